//! Working-tree inspection: which files a check covers and whether an
//! auto-fix check changed them.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Failure to determine the files in scope for a check.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("failed to run git: {0}")]
    GitUnavailable(#[source] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    GitFailed { command: String, stderr: String },

    #[error("{} is not inside a git work tree", .0.display())]
    NotAGitRepo(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run a path-listing git subcommand with `-z` in `dir` and return the
/// NUL-separated paths. Without `-z` git C-quotes non-ASCII names.
fn git_paths(dir: &Path, args: &[&str]) -> Result<Vec<String>, ScopeError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(ScopeError::GitUnavailable)?;

    if !output.status.success() {
        return Err(ScopeError::GitFailed {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output
        .stdout
        .split(|b| *b == 0)
        .filter(|p| !p.is_empty())
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect())
}

/// All files of the target, relative to it.
///
/// Inside a git work tree this is `git ls-files`; otherwise a recursive walk
/// that skips hidden entries and build output directories.
pub fn all_files(root: &Path) -> Result<Vec<String>, ScopeError> {
    let mut files = if is_git_repo(root) {
        git_paths(root, &["ls-files", "-z"])?
    } else {
        debug!(root = %root.display(), "Not a git work tree, walking directory");
        let mut found = Vec::new();
        collect_files_recursive(root, root, &mut found)?;
        found
    };
    files.sort();
    files.dedup();
    Ok(files)
}

/// Files changed relative to `base_ref`, plus untracked files, relative to
/// the target. Deleted files are not included.
pub fn changed_files(root: &Path, base_ref: &str) -> Result<Vec<String>, ScopeError> {
    if !is_git_repo(root) {
        return Err(ScopeError::NotAGitRepo(root.to_path_buf()));
    }

    let mut files = git_paths(
        root,
        &[
            "diff",
            "--name-only",
            "-z",
            "--relative",
            "--diff-filter=ACMR",
            base_ref,
        ],
    )?;
    files.extend(git_paths(
        root,
        &["ls-files", "-z", "--others", "--exclude-standard"],
    )?);
    files.sort();
    files.dedup();
    Ok(files)
}

/// Drop every path at or below the relative directory `dir`.
pub fn without_dir(files: Vec<String>, dir: &str) -> Vec<String> {
    let nested = format!("{dir}/");
    files
        .into_iter()
        .filter(|f| f != dir && !f.starts_with(&nested))
        .collect()
}

fn collect_files_recursive(
    root: &Path,
    dir: &Path,
    files: &mut Vec<String>,
) -> Result<(), ScopeError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.starts_with('.') || name == "target" || name == "node_modules" {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files_recursive(root, &path, files)?;
        } else if file_type.is_file() {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

/// Content digests of a fixed set of files, taken around an auto-fix check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSnapshot {
    /// Relative path -> SHA-256 hex digest, `None` if the file was absent.
    digests: BTreeMap<String, Option<String>>,
}

impl FileSnapshot {
    /// Digest every path under `root`. Unreadable files count as absent.
    pub fn capture(root: &Path, paths: &[String]) -> Self {
        let digests = paths
            .iter()
            .map(|p| (p.clone(), digest_file(&root.join(p))))
            .collect();
        Self { digests }
    }

    /// Paths whose content differs between `self` (before) and `after`.
    pub fn modified_in(&self, after: &FileSnapshot) -> Vec<String> {
        self.digests
            .iter()
            .filter(|(path, before)| after.digests.get(*path) != Some(*before))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.digests.len()
    }
}

fn digest_file(path: &Path) -> Option<String> {
    let content = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Some(hex::encode(hasher.finalize()))
}
