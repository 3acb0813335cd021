//! Subprocess execution for individual checks.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

/// Exit status shells use for "command not found".
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// A fully resolved check invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Check id, for logging.
    pub check_id: String,

    /// Program to execute.
    pub program: String,

    /// Arguments, including any appended file names.
    pub args: Vec<String>,

    /// Working directory (the gate target).
    pub working_dir: PathBuf,

    /// Wall-clock budget. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Command line as a single display string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Reasons a process did not run to completion.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("{program}: command not found")]
    NotFound { program: String },

    #[error("{program}: permission denied")]
    PermissionDenied { program: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process was killed at its deadline. `stdout` and `stderr` hold
    /// whatever it wrote before that.
    #[error("timed out after {after:?}")]
    TimedOut {
        after: Duration,
        duration_ms: u64,
        stdout: String,
        stderr: String,
    },

    #[error("io error while waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Executes a check invocation. The orchestrator awaits one invocation at a
/// time.
#[async_trait]
pub trait CheckExecutor: Send + Sync {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError>;
}

/// Runs invocations as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CheckExecutor for ProcessExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError> {
        let start = Instant::now();
        debug!(check = %invocation.check_id, command = %invocation.command_line(), "Spawning");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                let program = invocation.program.clone();
                match source.kind() {
                    ErrorKind::NotFound => ExecError::NotFound { program },
                    ErrorKind::PermissionDenied => ExecError::PermissionDenied { program },
                    _ => ExecError::Spawn { program, source },
                }
            })?;

        let stdout = Capture::spawn(child.stdout.take());
        let stderr = Capture::spawn(child.stderr.take());

        let status = match invocation.timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(status) => status,
                    Err(_) => {
                        let _ = child.kill().await;
                        // Grandchildren may still hold the pipes open.
                        return Err(ExecError::TimedOut {
                            after: limit,
                            duration_ms: start.elapsed().as_millis() as u64,
                            stdout: stdout.abort(),
                            stderr: stderr.abort(),
                        });
                    }
                }
            }
            None => child.wait().await,
        }
        .map_err(|source| ExecError::Wait {
            program: invocation.program.clone(),
            source,
        })?;

        Ok(ExecOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout.finish().await,
            stderr: stderr.finish().await,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// A child output pipe drained into a shared buffer by a background task.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn spawn<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let Some(mut reader) = reader else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                let Ok(n) = reader.read(&mut chunk).await else {
                    break;
                };
                if n == 0 {
                    break;
                }
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        });
        Self { buffer, task }
    }

    /// Wait for end of stream and return everything read.
    async fn finish(self) -> String {
        let _ = self.task.await;
        decode(&self.buffer)
    }

    /// Stop reading and return what was read so far.
    fn abort(self) -> String {
        self.task.abort();
        decode(&self.buffer)
    }
}

fn decode(buffer: &Mutex<Vec<u8>>) -> String {
    buffer
        .lock()
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}
