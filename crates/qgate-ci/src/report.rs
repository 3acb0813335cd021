//! Per-check results and the aggregated run report.

use crate::check::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a single check ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Tool exited 0 and changed nothing.
    Passed,

    /// Nothing in scope, the tool was not invoked.
    Skipped { reason: String },

    /// Auto-fix check rewrote files and the re-check passed.
    Fixed,

    /// Tool ran and reported violations.
    PolicyViolation,

    /// Secret scanner reported leaked credentials.
    SecretDetected,

    /// Tool could not be located or started, or its file scope could not be
    /// resolved.
    ToolingUnavailable { reason: String },

    /// Tool exceeded its wall-clock budget and was killed.
    TimedOut { timeout_ms: u64 },
}

impl CheckOutcome {
    /// Short label for summaries and violation lines.
    pub fn label(&self) -> &'static str {
        match self {
            CheckOutcome::Passed => "passed",
            CheckOutcome::Skipped { .. } => "skipped",
            CheckOutcome::Fixed => "fixed",
            CheckOutcome::PolicyViolation => "policy violation",
            CheckOutcome::SecretDetected => "secret detected",
            CheckOutcome::ToolingUnavailable { .. } => "tooling unavailable",
            CheckOutcome::TimedOut { .. } => "timed out",
        }
    }
}

/// Result of one check. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResult {
    /// Check id.
    pub check_id: String,

    pub category: Category,

    /// Command line of the (last) invocation.
    pub command: String,

    pub outcome: CheckOutcome,

    /// Whether this result counts as passing for the run.
    pub passed: bool,

    /// Exit code of the last invocation, if the tool ran to completion.
    pub exit_code: Option<i32>,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Files rewritten by an auto-fix check.
    #[serde(default)]
    pub modified_files: Vec<String>,

    /// Duration in milliseconds, re-check included.
    pub duration_ms: u64,
}

impl CheckResult {
    /// Whether the tool was missing or un-invocable.
    pub fn is_tooling_unavailable(&self) -> bool {
        matches!(self.outcome, CheckOutcome::ToolingUnavailable { .. })
    }
}

/// Aggregated, ordered outcome of one gate run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run id.
    pub run_id: String,

    pub started_at: DateTime<Utc>,

    /// Directory the checks ran against.
    pub target: PathBuf,

    pub fail_fast: bool,

    /// Digest of the ordered check list that was run.
    pub config_digest: String,

    /// Results in definition order.
    pub results: Vec<CheckResult>,

    /// Checks never executed because fail-fast stopped the run.
    #[serde(default)]
    pub not_run: Vec<String>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl RunReport {
    /// A run is green iff every result passes.
    pub fn is_green(&self) -> bool {
        self.results.iter().fold(true, |green, r| green && r.passed)
    }

    /// Number of checks that passed.
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Number of checks that failed.
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.passed).count()
    }

    /// Failing results, in order.
    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn result(&self, check_id: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.check_id == check_id)
    }
}
