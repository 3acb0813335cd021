//! Failure artifact persistence and retention policy.
//!
//! A failing run is written to `<dir>/<run_id>/` as:
//!
//! - `report.json`: the full [`RunReport`]
//! - `config.toml`: the effective configuration
//! - `logs/<check-id>.log`: command, outcome and captured output per check
//!
//! The directory is meant for CI artifact upload. [`RetentionPolicy`] prunes
//! older runs by count.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::report::{CheckResult, RunReport};

const REPORT_FILE: &str = "report.json";

/// Write the failure artifacts of `report` under `dir`.
///
/// Returns the run artifact directory.
pub fn write_failure_artifacts(
    report: &RunReport,
    config: &GateConfig,
    dir: &Path,
) -> Result<PathBuf> {
    let run_dir = dir.join(&report.run_id);
    let logs_dir = run_dir.join("logs");
    std::fs::create_dir_all(&logs_dir)?;

    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(run_dir.join(REPORT_FILE), &json)?;
    std::fs::write(run_dir.join("config.toml"), config.to_toml_string()?)?;

    for result in &report.results {
        let name = format!("{}.log", sanitize_file_name(&result.check_id));
        std::fs::write(logs_dir.join(name), render_log(result))?;
    }

    Ok(run_dir)
}

/// Read back a report written by [`write_failure_artifacts`].
pub fn read_report(run_dir: &Path) -> Result<RunReport> {
    let json = std::fs::read(run_dir.join(REPORT_FILE))?;
    Ok(serde_json::from_slice(&json)?)
}

fn render_log(result: &CheckResult) -> String {
    let mut log = String::new();
    let _ = writeln!(log, "check: {}", result.check_id);
    let _ = writeln!(log, "command: {}", result.command);
    let _ = writeln!(log, "outcome: {}", result.outcome.label());
    match result.exit_code {
        Some(code) => {
            let _ = writeln!(log, "exit code: {code}");
        }
        None => {
            let _ = writeln!(log, "exit code: none");
        }
    }
    let _ = writeln!(log, "duration: {}ms", result.duration_ms);
    if !result.modified_files.is_empty() {
        let _ = writeln!(log, "modified files:");
        for file in &result.modified_files {
            let _ = writeln!(log, "  {file}");
        }
    }
    let _ = writeln!(log, "\n--- stdout ---\n{}", result.stdout);
    let _ = writeln!(log, "--- stderr ---\n{}", result.stderr);
    log
}

/// Check ids are free-form; keep log file names on one path component.
fn sanitize_file_name(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

/// Retention policy for pruning run artifact directories.
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    /// Keep at most this many runs (newest first). `None` means no limit.
    pub max_runs: Option<usize>,
}

impl RetentionPolicy {
    pub fn keep(max_runs: usize) -> Self {
        Self {
            max_runs: Some(max_runs),
        }
    }

    /// Scan `<dir>/*/report.json` and delete the oldest runs beyond
    /// `max_runs`. Directories without a readable report are left alone.
    ///
    /// Returns the number of pruned entries.
    pub fn prune(&self, dir: &Path) -> Result<usize> {
        let Some(max_runs) = self.max_runs else {
            return Ok(0);
        };

        let read_dir = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(GateError::Io(e)),
        };

        let mut entries: Vec<(DateTime<Utc>, PathBuf)> = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if let Ok(report) = read_report(&path) {
                entries.push((report.started_at, path));
            }
        }

        if entries.len() <= max_runs {
            return Ok(0);
        }

        // Newest first
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        let mut pruned = 0usize;
        for (_, path) in entries.drain(max_runs..) {
            if std::fs::remove_dir_all(&path).is_ok() {
                pruned += 1;
            }
        }

        Ok(pruned)
    }
}
