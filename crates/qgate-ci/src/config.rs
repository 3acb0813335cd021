//! Gate configuration and identity.

use crate::check::{BuiltinCheck, CheckDefinition};
use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// File name looked up in the target directory when no config is given.
pub const DEFAULT_CONFIG_FILE: &str = "qgate.toml";

const DEFAULT_TIMEOUT_SECS: u64 = 600;
const DEFAULT_ARTIFACTS_KEEP: usize = 10;

/// Quality gate configuration.
///
/// Loaded once at process start and never mutated during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateConfig {
    /// Stop at the first failing check.
    #[serde(default)]
    pub fail_fast: bool,

    /// Per-check timeout when a check does not set its own. `0` disables it.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Ref that `changed-files` checks diff against.
    #[serde(default = "default_base_ref")]
    pub base_ref: String,

    /// Where failure artifacts are written, relative to the target.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Number of run artifact directories to retain.
    #[serde(default = "default_artifacts_keep")]
    pub artifacts_keep: usize,

    /// Treat a missing tool as a gate error (exit 2) instead of a failure.
    #[serde(default)]
    pub tooling_unavailable_fatal: bool,

    /// Let an auto-fix check that rewrote files count as passing.
    #[serde(default)]
    pub allow_fixes: bool,

    /// Ordered check list.
    #[serde(default, rename = "check")]
    pub checks: Vec<CheckDefinition>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_base_ref() -> String {
    "HEAD".to_string()
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from(".qgate/artifacts")
}

fn default_artifacts_keep() -> usize {
    DEFAULT_ARTIFACTS_KEEP
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::with_checks(Vec::new())
    }
}

impl GateConfig {
    /// Configuration with default settings and the given checks.
    pub fn with_checks(checks: Vec<CheckDefinition>) -> Self {
        Self {
            fail_fast: false,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            base_ref: default_base_ref(),
            artifacts_dir: default_artifacts_dir(),
            artifacts_keep: DEFAULT_ARTIFACTS_KEEP,
            tooling_unavailable_fatal: false,
            allow_fixes: false,
            checks,
        }
    }

    /// The builtin Python hook chain.
    pub fn builtin() -> Self {
        Self::with_checks(
            BuiltinCheck::DEFAULT_CHAIN
                .iter()
                .map(|c| CheckDefinition::from_builtin(*c))
                .collect(),
        )
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: GateConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GateError::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| GateError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded gate config");
        Self::from_toml_str(&content)
    }

    /// Resolve the config for a target: an explicit path wins, then
    /// `<target>/qgate.toml`, then the builtin chain.
    pub fn resolve(explicit: Option<&Path>, target: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = target.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            return Self::load(&candidate);
        }
        debug!("No {} in target, using builtin checks", DEFAULT_CONFIG_FILE);
        Ok(Self::builtin())
    }

    /// Check the invariants every run relies on.
    pub fn validate(&self) -> Result<()> {
        if self.checks.is_empty() {
            return Err(GateError::EmptyCheckList);
        }

        let mut seen = HashSet::new();
        for (idx, check) in self.checks.iter().enumerate() {
            if check.id.trim().is_empty() {
                return Err(GateError::EmptyCheckId(idx));
            }
            if !seen.insert(check.id.as_str()) {
                return Err(GateError::DuplicateCheckId(check.id.clone()));
            }
            match check.program() {
                Some(program) if !program.trim().is_empty() => {}
                _ => return Err(GateError::EmptyCommand(check.id.clone())),
            }
            check.file_filter()?;
        }

        Ok(())
    }

    /// Keep only the named checks, in definition order.
    pub fn select_only(mut self, ids: &[String]) -> Result<Self> {
        if ids.is_empty() {
            return Ok(self);
        }
        if let Some(unknown) = ids
            .iter()
            .find(|id| !self.checks.iter().any(|c| &c.id == *id))
        {
            return Err(GateError::UnknownCheck(unknown.clone()));
        }
        self.checks.retain(|c| ids.contains(&c.id));
        Ok(self)
    }

    /// Artifact directory for a run against `target`. An absolute
    /// `artifacts_dir` is used as is.
    pub fn artifacts_dir_in(&self, target: &Path) -> PathBuf {
        target.join(&self.artifacts_dir)
    }

    /// The artifact directory as a `/`-separated path relative to `target`,
    /// or `None` when it lies outside the target.
    pub fn artifacts_prefix(&self, target: &Path) -> Option<String> {
        let relative = if self.artifacts_dir.is_absolute() {
            let root = target.canonicalize().ok()?;
            let dir = self.artifacts_dir.canonicalize().ok()?;
            dir.strip_prefix(&root).ok()?.to_path_buf()
        } else {
            self.artifacts_dir.clone()
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                _ => return None,
            }
        }
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    /// Ordered check ids.
    pub fn check_ids(&self) -> Vec<String> {
        self.checks.iter().map(|c| c.id.clone()).collect()
    }

    /// SHA-256 digest of the ordered check ids and commands.
    pub fn digest(&self) -> String {
        compute_checks_digest(&self.checks)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Deterministic, order-sensitive digest of a check list.
fn compute_checks_digest(checks: &[CheckDefinition]) -> String {
    let mut hasher = Sha256::new();
    for check in checks {
        hasher.update(check.id.as_bytes());
        hasher.update(b"\0");
        for arg in &check.command {
            hasher.update(arg.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
