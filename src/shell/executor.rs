//! Privileged command execution
//!
//! A batch is written to one root shell's stdin followed by `exit`. Both
//! output pipes are drained on their own tasks so a chatty command can never
//! block the shell on a full pipe.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::command::{is_benign_stderr, CommandBatch};
use crate::error::{AppError, Result};

/// How long to wait for the output readers after the shell exited
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Output of one shell invocation
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    /// Exit status (None when killed by a signal)
    pub exit_code: Option<i32>,
    pub stdout: String,
    /// Stderr lines that did not match a benign pattern
    pub stderr: Vec<String>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A shell running with elevated privileges
#[async_trait]
pub trait PrivilegedShell: Send + Sync {
    /// Run every command of `batch` in one shell session
    async fn execute(&self, batch: &CommandBatch) -> Result<ShellOutput>;
}

/// Root shell obtained through a `su`-style binary
pub struct SuShell {
    program: String,
}

impl SuShell {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SuShell {
    fn default() -> Self {
        Self::new("su")
    }
}

#[async_trait]
impl PrivilegedShell for SuShell {
    async fn execute(&self, batch: &CommandBatch) -> Result<ShellOutput> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Shell(format!("Failed to start {}: {}", self.program, e)))?;

        let stdout_task = child.stdout.take().map(|mut stdout| {
            tokio::spawn(async move {
                let mut buf = String::new();
                if let Err(e) = stdout.read_to_string(&mut buf).await {
                    debug!("Error reading shell stdout: {}", e);
                }
                buf
            })
        });

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut reportable = Vec::new();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if is_benign_stderr(&line) {
                                debug!("[Shell] {}", line);
                            } else {
                                warn!("[Shell Err] {}", line);
                                reportable.push(line);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!("Error reading shell stderr: {}", e);
                            break;
                        }
                    }
                }
                reportable
            })
        });

        for cmd in batch.commands() {
            debug!("Executing: {}", cmd.line.chars().take(100).collect::<String>());
        }

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(batch.render().as_bytes()).await?;
            stdin.flush().await?;
            // Dropping stdin closes the pipe; `exit` in the script ends the shell
        }

        let status = child.wait().await?;

        let stdout = match stdout_task {
            Some(task) => tokio::time::timeout(READER_JOIN_TIMEOUT, task)
                .await
                .ok()
                .and_then(|r| r.ok())
                .unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match stderr_task {
            Some(task) => tokio::time::timeout(READER_JOIN_TIMEOUT, task)
                .await
                .ok()
                .and_then(|r| r.ok())
                .unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(ShellOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Boolean-reducing front end over a [`PrivilegedShell`]
///
/// Nothing returned from here is an error: spawn and IO failures are logged
/// and reported as an unsuccessful batch.
#[derive(Clone)]
pub struct PrivilegedExecutor {
    shell: Arc<dyn PrivilegedShell>,
}

impl PrivilegedExecutor {
    pub fn new(shell: Arc<dyn PrivilegedShell>) -> Self {
        Self { shell }
    }

    /// Root shell from the given `su` program
    pub fn su(program: &str) -> Self {
        Self::new(Arc::new(SuShell::new(program)))
    }

    /// Run a batch; true iff the shell exited 0
    pub async fn run(&self, batch: &CommandBatch) -> bool {
        if batch.is_empty() {
            return true;
        }
        match self.shell.execute(batch).await {
            Ok(output) => {
                if !output.success() {
                    warn!("Command batch returned non-zero: {:?}", output.exit_code);
                }
                output.success()
            }
            Err(e) => {
                warn!("Command batch failed: {}", e);
                false
            }
        }
    }

    /// Run a single command; true iff it exited 0
    pub async fn check(&self, line: impl Into<String>) -> bool {
        self.run(&CommandBatch::single(line)).await
    }

    /// Trimmed stdout of a single command, None if it failed
    pub async fn capture(&self, line: impl Into<String>) -> Option<String> {
        match self.shell.execute(&CommandBatch::single(line)).await {
            Ok(output) if output.success() => Some(output.stdout.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!("Command failed: {}", e);
                None
            }
        }
    }

    /// Trimmed stdout of a single command, empty if it failed
    pub async fn read(&self, line: impl Into<String>) -> String {
        self.capture(line).await.unwrap_or_default()
    }

    /// Whether the privileged shell is usable at all
    pub async fn is_root_granted(&self) -> bool {
        self.check("id").await
    }
}
