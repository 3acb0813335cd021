//! Check definitions: what to run, against which files, and whether it may
//! rewrite them.

use crate::error::{GateError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which files a check is pointed at.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// Every tracked file in the target.
    #[default]
    AllFiles,

    /// Only files changed relative to the configured base ref.
    ChangedFiles,
}

/// Whether a check only reports or may also rewrite files.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Reports violations without touching the tree.
    #[default]
    ReadOnly,

    /// May rewrite files in place (formatters, import sorters).
    AutoFix,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::AllFiles => "all-files",
            Scope::ChangedFiles => "changed-files",
        }
    }
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ReadOnly => "read-only",
            Category::AutoFix => "auto-fix",
        }
    }
}

/// Builtin checks forming the default Python hook chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinCheck {
    /// isort --profile black
    Isort,

    /// black --quiet
    Black,

    /// pylint
    Pylint,

    /// mypy --ignore-missing-imports
    Mypy,

    /// detect-secrets-hook --baseline .secrets.baseline
    DetectSecrets,
}

impl BuiltinCheck {
    /// The default chain, in execution order. Formatters run first so the
    /// linters see the fixed tree.
    pub const DEFAULT_CHAIN: [BuiltinCheck; 5] = [
        BuiltinCheck::Isort,
        BuiltinCheck::Black,
        BuiltinCheck::Pylint,
        BuiltinCheck::Mypy,
        BuiltinCheck::DetectSecrets,
    ];

    /// Get the check id.
    pub fn id(&self) -> &'static str {
        match self {
            BuiltinCheck::Isort => "isort",
            BuiltinCheck::Black => "black",
            BuiltinCheck::Pylint => "pylint",
            BuiltinCheck::Mypy => "mypy",
            BuiltinCheck::DetectSecrets => "detect-secrets",
        }
    }

    /// Get the check's command line (first element is the program).
    pub fn command(&self) -> Vec<String> {
        let parts: &[&str] = match self {
            BuiltinCheck::Isort => &["isort", "--profile", "black"],
            BuiltinCheck::Black => &["black", "--quiet"],
            BuiltinCheck::Pylint => &["pylint"],
            BuiltinCheck::Mypy => &["mypy", "--ignore-missing-imports"],
            BuiltinCheck::DetectSecrets => {
                &["detect-secrets-hook", "--baseline", ".secrets.baseline"]
            }
        };
        parts.iter().map(|s| s.to_string()).collect()
    }

    pub fn category(&self) -> Category {
        match self {
            BuiltinCheck::Isort | BuiltinCheck::Black => Category::AutoFix,
            _ => Category::ReadOnly,
        }
    }

    /// Include pattern for the files this tool understands.
    pub fn files(&self) -> Option<&'static str> {
        match self {
            BuiltinCheck::DetectSecrets => None,
            _ => Some(r"\.pyi?$"),
        }
    }
}

/// A single check in the gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckDefinition {
    /// Unique identifier within the run.
    pub id: String,

    /// Command to execute (first element is the program).
    pub command: Vec<String>,

    #[serde(default)]
    pub scope: Scope,

    #[serde(default)]
    pub category: Category,

    /// Append the scoped file list to the command line.
    #[serde(default = "default_pass_filenames")]
    pub pass_filenames: bool,

    /// Only files whose relative path matches this regex are in scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<String>,

    /// Files whose relative path matches this regex are dropped from scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,

    /// Wall-clock budget in seconds. `0` disables the bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Violations from this check are leaked credentials.
    #[serde(default)]
    pub secret_scan: bool,
}

fn default_pass_filenames() -> bool {
    true
}

impl CheckDefinition {
    /// Create a check definition from a builtin check.
    pub fn from_builtin(check: BuiltinCheck) -> Self {
        Self {
            id: check.id().to_string(),
            command: check.command(),
            scope: Scope::AllFiles,
            category: check.category(),
            pass_filenames: true,
            files: check.files().map(str::to_string),
            exclude: None,
            timeout_secs: None,
            secret_scan: matches!(check, BuiltinCheck::DetectSecrets),
        }
    }

    /// Create a custom read-only check over all files that does not receive
    /// file names.
    pub fn custom(id: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            id: id.into(),
            command,
            scope: Scope::AllFiles,
            category: Category::ReadOnly,
            pass_filenames: false,
            files: None,
            exclude: None,
            timeout_secs: None,
            secret_scan: false,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_files(mut self, pattern: impl Into<String>) -> Self {
        self.files = Some(pattern.into());
        self
    }

    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude = Some(pattern.into());
        self
    }

    pub fn passing_filenames(mut self, pass: bool) -> Self {
        self.pass_filenames = pass;
        self
    }

    pub fn secret_scanner(mut self) -> Self {
        self.secret_scan = true;
        self
    }

    pub fn is_auto_fix(&self) -> bool {
        self.category == Category::AutoFix
    }

    /// The program to invoke, if the command is non-empty.
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    /// Arguments following the program.
    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }

    /// Resolve the wall-clock budget against the config-level default.
    /// Returns `None` when the check is unbounded.
    pub fn effective_timeout(&self, default_secs: u64) -> Option<Duration> {
        match self.timeout_secs.unwrap_or(default_secs) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Compile the include/exclude patterns.
    pub fn file_filter(&self) -> Result<FileFilter> {
        let compile = |field: &'static str, pattern: &Option<String>| -> Result<Option<Regex>> {
            pattern
                .as_deref()
                .map(|p| {
                    Regex::new(p).map_err(|source| GateError::InvalidPattern {
                        id: self.id.clone(),
                        field,
                        source,
                    })
                })
                .transpose()
        };

        Ok(FileFilter {
            include: compile("files", &self.files)?,
            exclude: compile("exclude", &self.exclude)?,
        })
    }
}

/// Compiled include/exclude patterns of a check.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl FileFilter {
    /// Whether a relative path is in scope.
    pub fn matches(&self, path: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |re| re.is_match(path));
        let excluded = self.exclude.as_ref().is_some_and(|re| re.is_match(path));
        included && !excluded
    }

    /// Keep only the in-scope paths, preserving order.
    pub fn apply(&self, paths: Vec<String>) -> Vec<String> {
        paths.into_iter().filter(|p| self.matches(p)).collect()
    }
}
