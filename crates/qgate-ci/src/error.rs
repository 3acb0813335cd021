//! Error taxonomy for the quality gate.
//!
//! Configuration problems and artifact I/O surface as [`GateError`].
//! Everything that goes wrong while running an individual check is captured
//! into that check's [`CheckResult`](crate::report::CheckResult) instead.

use std::path::PathBuf;

/// Errors that abort a run before any check executes, or fail an artifact
/// write.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("failed to read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("check list is empty")]
    EmptyCheckList,

    #[error("check at position {0} has an empty id")]
    EmptyCheckId(usize),

    #[error("duplicate check id: {0}")]
    DuplicateCheckId(String),

    #[error("check {0} has an empty command")]
    EmptyCommand(String),

    #[error("check {id} has an invalid {field} pattern: {source}")]
    InvalidPattern {
        id: String,
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("unknown check id: {0}")]
    UnknownCheck(String),

    #[error("target path is not a directory: {}", .0.display())]
    InvalidTarget(PathBuf),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for quality gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
