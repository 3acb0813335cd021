//! qgate CI - sequential quality gate
//!
//! Provides a quality-gate orchestrator that:
//! - Runs an ordered list of lint/format/secret-scan checks as subprocesses
//! - Tracks auto-fix checks and re-checks the files they rewrite
//! - Aggregates results into a report and a pass/fail verdict
//! - Writes diagnostic artifacts for failed runs

pub mod artifact;
pub mod check;
pub mod config;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod telemetry;
pub mod workspace;

// Re-export key types
pub use artifact::{write_failure_artifacts, RetentionPolicy};
pub use check::{BuiltinCheck, Category, CheckDefinition, Scope};
pub use config::{GateConfig, DEFAULT_CONFIG_FILE};
pub use error::{GateError, Result};
pub use gate::{GateExit, GatePolicy, GateVerdict, QualityGate};
pub use pipeline::GatePipeline;
pub use report::{CheckOutcome, CheckResult, RunReport};
pub use runner::{CheckExecutor, ExecError, ExecOutput, Invocation, ProcessExecutor};
pub use telemetry::init_tracing;
