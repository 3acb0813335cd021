//! Quality gate orchestration.

use crate::check::{CheckDefinition, FileFilter, Scope};
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::report::{CheckOutcome, CheckResult, RunReport};
use crate::runner::{CheckExecutor, ExecError, ExecOutput, Invocation, EXIT_COMMAND_NOT_FOUND};
use crate::workspace::{self, FileSnapshot, ScopeError};
use chrono::Utc;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on the bytes of file names appended to one invocation.
const MAX_FILE_ARGS_BYTES: usize = 128 * 1024;

/// Sequential quality gate orchestrator.
pub struct GatePipeline;

impl GatePipeline {
    /// Run every check of `config` against `target`, one at a time and in
    /// definition order.
    ///
    /// Only configuration problems are returned as errors, and they are
    /// detected before any check runs. Per-check failures (missing tools,
    /// violations, timeouts) are captured in the report. With
    /// `config.fail_fast` the run stops after the first failing result and
    /// the remaining ids are listed in [`RunReport::not_run`].
    pub async fn run(
        executor: &dyn CheckExecutor,
        config: &GateConfig,
        target: &Path,
    ) -> Result<RunReport> {
        config.validate()?;
        if !target.is_dir() {
            return Err(GateError::InvalidTarget(target.to_path_buf()));
        }
        let filters = config
            .checks
            .iter()
            .map(CheckDefinition::file_filter)
            .collect::<Result<Vec<_>>>()?;

        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        info!(
            run_id = %run_id,
            checks = config.checks.len(),
            fail_fast = config.fail_fast,
            "Starting quality gate"
        );

        let artifacts = config.artifacts_prefix(target);
        let mut results = Vec::with_capacity(config.checks.len());
        let mut not_run = Vec::new();

        for (idx, (check, filter)) in config.checks.iter().zip(&filters).enumerate() {
            info!(check = %check.id, "Executing check");

            let result =
                Self::run_check(executor, config, target, check, filter, artifacts.as_deref())
                    .await;
            if result.passed {
                info!(
                    check = %check.id,
                    outcome = result.outcome.label(),
                    duration_ms = result.duration_ms,
                    "Check passed"
                );
            } else {
                warn!(
                    check = %check.id,
                    outcome = result.outcome.label(),
                    duration_ms = result.duration_ms,
                    "Check failed"
                );
            }

            let failed = !result.passed;
            results.push(result);

            if failed && config.fail_fast {
                not_run = config.checks[idx + 1..]
                    .iter()
                    .map(|c| c.id.clone())
                    .collect();
                if !not_run.is_empty() {
                    info!(skipped = not_run.len(), "Fail-fast: stopping after first failure");
                }
                break;
            }
        }

        let report = RunReport {
            run_id,
            started_at,
            target: target.to_path_buf(),
            fail_fast: config.fail_fast,
            config_digest: config.digest(),
            results,
            not_run,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if report.is_green() {
            info!(run_id = %report.run_id, "Quality gate passed");
        } else {
            info!(
                run_id = %report.run_id,
                failed = report.failed_count(),
                "Quality gate failed"
            );
        }

        Ok(report)
    }

    async fn run_check(
        executor: &dyn CheckExecutor,
        config: &GateConfig,
        target: &Path,
        check: &CheckDefinition,
        filter: &FileFilter,
        artifacts: Option<&str>,
    ) -> CheckResult {
        let files = match resolve_scope(check, filter, target, &config.base_ref, artifacts) {
            Ok(files) => files,
            Err(e) => {
                return unavailable(check, check.command.join(" "), e.to_string(), 0);
            }
        };

        if let Some(files) = &files {
            if files.is_empty() && (check.pass_filenames || check.scope == Scope::ChangedFiles) {
                debug!(check = %check.id, "No files in scope");
                return CheckResult {
                    check_id: check.id.clone(),
                    category: check.category,
                    command: check.command.join(" "),
                    outcome: CheckOutcome::Skipped {
                        reason: "no files in scope".to_string(),
                    },
                    passed: true,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    modified_files: Vec::new(),
                    duration_ms: 0,
                };
            }
        }
        let files = files.unwrap_or_default();

        let invocations = build_invocations(
            check,
            &files,
            target,
            check.effective_timeout(config.default_timeout_secs),
        );
        let command = display_command(check, &files, &invocations);
        if invocations.len() > 1 {
            debug!(
                check = %check.id,
                files = files.len(),
                batches = invocations.len(),
                "Splitting file arguments into batches"
            );
        }

        let before = check.is_auto_fix().then(|| {
            let snapshot = FileSnapshot::capture(target, &files);
            debug!(check = %check.id, files = snapshot.len(), "Captured pre-fix snapshot");
            snapshot
        });

        let first = match execute_batches(executor, &invocations).await {
            (output, None) => output,
            (output, Some(e)) => return exec_failure(check, command, e, output),
        };

        let modified = before
            .map(|b| b.modified_in(&FileSnapshot::capture(target, &files)))
            .unwrap_or_default();

        if modified.is_empty() {
            let (outcome, passed) = classify(check, &first);
            return completed(check, command, outcome, passed, first, Vec::new());
        }

        info!(
            check = %check.id,
            files = modified.len(),
            "Auto-fix modified files, re-checking"
        );

        let second = match execute_batches(executor, &invocations).await {
            (output, None) => output,
            (output, Some(e)) => {
                let prior = merge_outputs(&first, output);
                let mut result = exec_failure(check, command, e, prior);
                result.modified_files = modified;
                return result;
            }
        };

        let (outcome, passed) = if second.success() {
            (CheckOutcome::Fixed, config.allow_fixes)
        } else {
            classify(check, &second)
        };

        let merged = merge_outputs(&first, second);
        completed(check, command, outcome, passed, merged, modified)
    }
}

/// The files a check covers, relative to the target.
///
/// `None` when the check neither receives file names nor needs them for
/// change detection, so no listing is done. Paths under the artifact
/// directory are never in scope.
fn resolve_scope(
    check: &CheckDefinition,
    filter: &FileFilter,
    target: &Path,
    base_ref: &str,
    artifacts: Option<&str>,
) -> std::result::Result<Option<Vec<String>>, ScopeError> {
    let files = match check.scope {
        Scope::ChangedFiles => workspace::changed_files(target, base_ref)?,
        Scope::AllFiles if check.pass_filenames || check.is_auto_fix() => {
            workspace::all_files(target)?
        }
        Scope::AllFiles => return Ok(None),
    };
    let files = match artifacts {
        Some(dir) => workspace::without_dir(files, dir),
        None => files,
    };
    Ok(Some(filter.apply(files)))
}

/// Split `files` into consecutive batches whose NUL-terminated names fit in
/// `budget` bytes. A name longer than the budget gets a batch of its own.
fn batch_files(files: &[String], budget: usize) -> Vec<&[String]> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (idx, file) in files.iter().enumerate() {
        let cost = file.len() + 1;
        if idx > start && used + cost > budget {
            batches.push(&files[start..idx]);
            start = idx;
            used = 0;
        }
        used += cost;
    }
    batches.push(&files[start..]);
    batches
}

/// One invocation per file batch, or a single one when the check does not
/// receive file names.
fn build_invocations(
    check: &CheckDefinition,
    files: &[String],
    target: &Path,
    timeout: Option<Duration>,
) -> Vec<Invocation> {
    // validate() guarantees a program.
    let program = check.program().unwrap_or_default();
    let batches = if check.pass_filenames {
        batch_files(files, MAX_FILE_ARGS_BYTES)
    } else {
        vec![&files[..0]]
    };

    batches
        .into_iter()
        .map(|batch| Invocation {
            check_id: check.id.clone(),
            program: program.to_string(),
            args: check.args().iter().chain(batch).cloned().collect(),
            working_dir: target.to_path_buf(),
            timeout,
        })
        .collect()
}

fn display_command(
    check: &CheckDefinition,
    files: &[String],
    invocations: &[Invocation],
) -> String {
    match invocations {
        [single] => single.command_line(),
        _ => format!(
            "{} <{} files in {} batches>",
            check.command.join(" "),
            files.len(),
            invocations.len()
        ),
    }
}

/// Run the batches in order and fold their outputs. Every batch runs even
/// after one fails; the folded exit code is the first non-zero one. The
/// timeout is a budget for all batches together.
///
/// On an execution error, returns the output of the batches that completed
/// alongside the error.
async fn execute_batches(
    executor: &dyn CheckExecutor,
    invocations: &[Invocation],
) -> (ExecOutput, Option<ExecError>) {
    let start = Instant::now();
    let mut folded = ExecOutput::default();

    for invocation in invocations {
        let budget = invocation.timeout;
        let mut batch = invocation.clone();
        batch.timeout = budget.map(|b| b.saturating_sub(start.elapsed()));

        match executor.execute(&batch).await {
            Ok(output) => {
                if folded.exit_code == 0 {
                    folded.exit_code = output.exit_code;
                }
                folded.stdout.push_str(&output.stdout);
                folded.stderr.push_str(&output.stderr);
                folded.duration_ms += output.duration_ms;
            }
            Err(ExecError::TimedOut {
                after,
                duration_ms,
                stdout,
                stderr,
            }) => {
                let err = ExecError::TimedOut {
                    after: budget.unwrap_or(after),
                    duration_ms,
                    stdout,
                    stderr,
                };
                return (folded, Some(err));
            }
            Err(e) => return (folded, Some(e)),
        }
    }

    (folded, None)
}

fn classify(check: &CheckDefinition, output: &ExecOutput) -> (CheckOutcome, bool) {
    match output.exit_code {
        0 => (CheckOutcome::Passed, true),
        EXIT_COMMAND_NOT_FOUND => (
            CheckOutcome::ToolingUnavailable {
                reason: format!(
                    "{} exited with status {} (command not found)",
                    check.program().unwrap_or_default(),
                    EXIT_COMMAND_NOT_FOUND
                ),
            },
            false,
        ),
        _ if check.secret_scan => (CheckOutcome::SecretDetected, false),
        _ => (CheckOutcome::PolicyViolation, false),
    }
}

fn completed(
    check: &CheckDefinition,
    command: String,
    outcome: CheckOutcome,
    passed: bool,
    output: ExecOutput,
    modified_files: Vec<String>,
) -> CheckResult {
    CheckResult {
        check_id: check.id.clone(),
        category: check.category,
        command,
        outcome,
        passed,
        exit_code: Some(output.exit_code),
        stdout: output.stdout,
        stderr: output.stderr,
        modified_files,
        duration_ms: output.duration_ms,
    }
}

/// Result for a check whose execution did not complete. `prior` holds the
/// output gathered before the failure.
fn exec_failure(
    check: &CheckDefinition,
    command: String,
    err: ExecError,
    prior: ExecOutput,
) -> CheckResult {
    match err {
        ExecError::TimedOut {
            after,
            duration_ms,
            stdout,
            stderr,
        } => CheckResult {
            check_id: check.id.clone(),
            category: check.category,
            command,
            outcome: CheckOutcome::TimedOut {
                timeout_ms: after.as_millis() as u64,
            },
            passed: false,
            exit_code: None,
            stdout: prior.stdout + &stdout,
            stderr: format!("{}{}timed out after {:?}\n", prior.stderr, stderr, after),
            modified_files: Vec::new(),
            duration_ms: prior.duration_ms + duration_ms,
        },
        other => {
            let mut result = unavailable(check, command, other.to_string(), prior.duration_ms);
            result.stdout = prior.stdout;
            result.stderr.insert_str(0, &prior.stderr);
            result
        }
    }
}

fn unavailable(
    check: &CheckDefinition,
    command: String,
    reason: String,
    duration_ms: u64,
) -> CheckResult {
    CheckResult {
        check_id: check.id.clone(),
        category: check.category,
        command,
        stderr: format!("{reason}\n"),
        outcome: CheckOutcome::ToolingUnavailable { reason },
        passed: false,
        exit_code: None,
        stdout: String::new(),
        modified_files: Vec::new(),
        duration_ms,
    }
}

/// Output of a run followed by its re-check.
fn merge_outputs(first: &ExecOutput, recheck: ExecOutput) -> ExecOutput {
    ExecOutput {
        exit_code: recheck.exit_code,
        stdout: merge_streams(&first.stdout, &recheck.stdout),
        stderr: merge_streams(&first.stderr, &recheck.stderr),
        duration_ms: first.duration_ms + recheck.duration_ms,
    }
}

fn merge_streams(first: &str, recheck: &str) -> String {
    if recheck.is_empty() {
        return first.to_string();
    }
    format!("{first}--- re-check ---\n{recheck}")
}
