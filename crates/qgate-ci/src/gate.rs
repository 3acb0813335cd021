//! Gate evaluation: folds a run report into a verdict and exit code.

use crate::config::GateConfig;
use crate::report::{CheckOutcome, RunReport};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process exit status of a gate run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateExit {
    /// Every check passed.
    Passed,

    /// At least one check failed.
    Failed,

    /// Configuration error, or a missing tool under a fatal tooling policy.
    Error,
}

impl GateExit {
    pub fn code(self) -> u8 {
        match self {
            GateExit::Passed => 0,
            GateExit::Failed => 1,
            GateExit::Error => 2,
        }
    }
}

/// How strictly to treat per-check failure kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatePolicy {
    /// A missing tool escalates the run to [`GateExit::Error`].
    pub tooling_unavailable_fatal: bool,
}

impl From<&GateConfig> for GatePolicy {
    fn from(config: &GateConfig) -> Self {
        Self {
            tooling_unavailable_fatal: config.tooling_unavailable_fatal,
        }
    }
}

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    pub exit: GateExit,

    /// One line per failing check (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Quality gate evaluation rules.
pub struct QualityGate;

impl QualityGate {
    /// Evaluate a run report.
    ///
    /// The gate passes iff every result passes. A failing run exits with
    /// [`GateExit::Failed`], or [`GateExit::Error`] when a tool was
    /// unavailable and the policy makes that fatal.
    pub fn evaluate(report: &RunReport, policy: GatePolicy) -> GateVerdict {
        let violations: Vec<String> = report
            .failures()
            .map(|r| match &r.outcome {
                CheckOutcome::ToolingUnavailable { reason } => {
                    format!("Check '{}' tooling unavailable: {}", r.check_id, reason)
                }
                CheckOutcome::TimedOut { timeout_ms } => format!(
                    "Check '{}' timed out after {:?}",
                    r.check_id,
                    Duration::from_millis(*timeout_ms)
                ),
                CheckOutcome::SecretDetected => format!(
                    "Check '{}' detected secrets (exit code {})",
                    r.check_id,
                    r.exit_code.unwrap_or(-1)
                ),
                CheckOutcome::Fixed => format!(
                    "Check '{}' modified {} file(s): {}",
                    r.check_id,
                    r.modified_files.len(),
                    r.modified_files.join(", ")
                ),
                other => format!(
                    "Check '{}' {} (exit code {})",
                    r.check_id,
                    other.label(),
                    r.exit_code.unwrap_or(-1)
                ),
            })
            .collect();

        let passed = report.is_green();
        let fatal_tooling = policy.tooling_unavailable_fatal
            && report.failures().any(|r| r.is_tooling_unavailable());

        let exit = if passed {
            GateExit::Passed
        } else if fatal_tooling {
            GateExit::Error
        } else {
            GateExit::Failed
        };

        let message = if passed {
            "All checks passed".to_string()
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            exit,
            violations,
            message,
        }
    }
}
