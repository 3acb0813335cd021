//! qgate - sequential quality gate
//!
//! The `qgate` command runs an ordered chain of lint, format and
//! secret-scan tools against a working tree and fails when any of them
//! reports a violation.
//!
//! ## Exit codes
//!
//! - `0`: every check passed
//! - `1`: at least one check failed
//! - `2`: configuration error, or a missing tool under a fatal tooling policy

use anyhow::{Context, Result};
use clap::Parser;
use qgate_ci::{
    write_failure_artifacts, CheckOutcome, GateConfig, GateExit, GatePipeline, GatePolicy,
    GateVerdict, ProcessExecutor, QualityGate, RetentionPolicy, RunReport,
};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "qgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sequential quality gate for CI", long_about = None)]
struct Cli {
    /// Directory to check (default: current directory)
    #[arg(default_value = ".")]
    target: PathBuf,

    /// Gate config file (default: <target>/qgate.toml, else builtin checks)
    #[arg(short, long, env = "QGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Stop at the first failing check
    #[arg(long)]
    fail_fast: bool,

    /// Run only these checks (repeatable or comma-separated)
    #[arg(long, value_delimiter = ',')]
    only: Vec<String>,

    /// Write failure artifacts here instead of the configured directory
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Print the effective check list and exit
    #[arg(long)]
    list: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    qgate_ci::init_tracing(cli.json, level);

    match run(&cli).await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(GateExit::Error.code())
        }
    }
}

/// Run the gate and return the exit status. Errors are configuration
/// problems and map to exit code 2.
async fn run(cli: &Cli) -> Result<GateExit> {
    let config = load_config(cli).context("Invalid gate configuration")?;

    if cli.list {
        print!("{}", render_check_list(&config));
        return Ok(GateExit::Passed);
    }

    println!("Running quality gate for: {}", cli.target.display());
    println!("Checks: {}", config.check_ids().join(", "));
    println!();

    let report = GatePipeline::run(&ProcessExecutor, &config, &cli.target)
        .await
        .context("Quality gate failed to start")?;

    let verdict = QualityGate::evaluate(&report, GatePolicy::from(&config));
    print!("{}", render_summary(&report, &verdict));

    if !verdict.passed {
        let dir = config.artifacts_dir_in(&cli.target);
        if let Some(run_dir) = persist_artifacts(&report, &config, &dir) {
            println!("Artifacts: {}", run_dir.display());
        }
    }

    Ok(verdict.exit)
}

/// Resolve the config and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<GateConfig> {
    let mut config = GateConfig::resolve(cli.config.as_deref(), &cli.target)?
        .select_only(&cli.only)?;
    config.fail_fast |= cli.fail_fast;
    if let Some(dir) = &cli.artifacts_dir {
        config.artifacts_dir = std::env::current_dir()
            .context("Failed to resolve current directory")?
            .join(dir);
    }
    Ok(config)
}

/// Write failure artifacts and apply retention, which always keeps the run
/// just written. Artifact problems are logged and never change the exit code.
fn persist_artifacts(report: &RunReport, config: &GateConfig, dir: &Path) -> Option<PathBuf> {
    let run_dir = match write_failure_artifacts(report, config, dir) {
        Ok(run_dir) => run_dir,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to write failure artifacts");
            return None;
        }
    };

    match RetentionPolicy::keep(config.artifacts_keep.max(1)).prune(dir) {
        Ok(0) => {}
        Ok(pruned) => info!(pruned, "Pruned old gate artifacts"),
        Err(e) => warn!(error = %e, "Failed to prune gate artifacts"),
    }

    Some(run_dir)
}

fn render_check_list(config: &GateConfig) -> String {
    let mut out = String::new();
    for check in &config.checks {
        let mut flags = vec![check.scope.as_str(), check.category.as_str()];
        if check.secret_scan {
            flags.push("secret-scan");
        }
        let _ = writeln!(
            out,
            "{:<20} {:<40} [{}]",
            check.id,
            check.command.join(" "),
            flags.join(", ")
        );
    }
    out
}

fn render_summary(report: &RunReport, verdict: &GateVerdict) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run ID: {}", report.run_id);
    let _ = writeln!(
        out,
        "Status: {}",
        if verdict.passed { "✓ PASSED" } else { "✗ FAILED" }
    );
    let _ = writeln!(out, "Duration: {}ms", report.duration_ms);
    let _ = writeln!(out);

    for result in &report.results {
        let status = if result.passed { "✓" } else { "✗" };
        let detail = match (&result.outcome, result.exit_code) {
            (CheckOutcome::Skipped { reason }, _) => reason.clone(),
            (outcome, Some(code)) => format!("{}, exit code: {}", outcome.label(), code),
            (outcome, None) => outcome.label().to_string(),
        };
        let _ = writeln!(
            out,
            "  {} {} ({}ms, {})",
            status, result.check_id, result.duration_ms, detail
        );
    }
    for id in &report.not_run {
        let _ = writeln!(out, "  - {} (not run: fail-fast)", id);
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Summary: {}/{} checks passed",
        report.passed_count(),
        report.results.len() + report.not_run.len()
    );

    if !verdict.violations.is_empty() {
        let _ = writeln!(out, "Violations:");
        for violation in &verdict.violations {
            let _ = writeln!(out, "  - {}", violation);
        }
    }

    if verdict.passed {
        let _ = writeln!(out, "\n✓ All checks passed!");
    } else {
        let _ = writeln!(out, "\n{}", verdict.message);
    }
    out
}
