//! Base command execution abstraction
//!
//! Every external process the diagnostics spawn goes through
//! [`CommandExecutor`]. An execution never fails past this boundary: spawn
//! errors, timeouts and non-zero exits all come back as a [`CommandOutput`]
//! the caller classifies.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// How the captured stdout of a command is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Parse stdout as one JSON document per line (or a single JSON array)
    JsonLines,
    /// Keep stdout as text
    Text,
    /// Drop stdout and stderr, only the exit status matters
    Discard,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },
    #[error("Permission denied running {command}")]
    PermissionDenied { command: String },
    #[error("Command timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("Empty command line")]
    EmptyCommand,
    #[error("IO error: {message}")]
    Io { message: String },
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when the process never ran to completion
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Set when the process could not be spawned or was killed on timeout
    pub error: Option<CommandError>,
    /// Parsed records in [`OutputMode::JsonLines`]
    pub records: Vec<serde_json::Value>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.status_code == Some(0)
    }

    pub fn from_error(error: CommandError) -> Self {
        Self {
            timed_out: matches!(error, CommandError::Timeout { .. }),
            error: Some(error),
            ..Default::default()
        }
    }

    /// Build a completed output, mostly useful for scripted executors
    pub fn completed(status_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn is_not_installed(&self) -> bool {
        matches!(self.error, Some(CommandError::CommandNotFound { .. }))
    }

    /// One-line reason for a failed execution, suitable for sub-result messages
    pub fn failure_reason(&self) -> String {
        if let Some(error) = &self.error {
            return error.to_string();
        }
        let stderr = self.stderr.trim();
        match (self.status_code, stderr.is_empty()) {
            (Some(code), true) => format!("exited with status {code}"),
            (Some(code), false) => format!("exited with status {code}: {stderr}"),
            (None, _) => "terminated without exit status".to_string(),
        }
    }
}

/// Parse JSON-lines output. A single JSON array is flattened into records.
pub fn parse_json_records(stdout: &str) -> Vec<serde_json::Value> {
    let trimmed = stdout.trim();
    if trimmed.starts_with('[') {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(trimmed) {
            return items;
        }
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Trait for executing external commands
///
/// This abstraction allows the rest of the codebase to execute commands
/// without directly depending on the process API, enabling testing
/// with scripted implementations.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `argv` with a mandatory wall-clock timeout
    async fn run(&self, argv: &[&str], timeout: Duration, mode: OutputMode) -> CommandOutput;

    /// Resolve a tool on the PATH without running it
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    /// Run a shell command line through `sh -c`
    async fn run_shell(&self, command_line: &str, timeout: Duration) -> CommandOutput {
        self.run(&["sh", "-c", command_line], timeout, OutputMode::Text).await
    }
}

/// Real implementation spawning processes with tokio
pub struct ProcessCommandExecutor;

#[async_trait]
impl CommandExecutor for ProcessCommandExecutor {
    async fn run(&self, argv: &[&str], timeout: Duration, mode: OutputMode) -> CommandOutput {
        let Some((program, args)) = argv.split_first() else {
            return CommandOutput::from_error(CommandError::EmptyCommand);
        };

        let (stdout, stderr) = match mode {
            OutputMode::Discard => (Stdio::null(), Stdio::null()),
            _ => (Stdio::piped(), Stdio::piped()),
        };

        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                let error = match e.kind() {
                    std::io::ErrorKind::NotFound => CommandError::CommandNotFound {
                        command: program.to_string(),
                    },
                    std::io::ErrorKind::PermissionDenied => CommandError::PermissionDenied {
                        command: program.to_string(),
                    },
                    _ => CommandError::Io { message: e.to_string() },
                };
                debug!(program, %error, "command could not be spawned");
                return CommandOutput::from_error(error);
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let records = match mode {
                    OutputMode::JsonLines => parse_json_records(&stdout),
                    _ => Vec::new(),
                };
                debug!(program, status = ?output.status.code(), "command finished");
                CommandOutput {
                    status_code: output.status.code(),
                    stdout,
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    timed_out: false,
                    error: None,
                    records,
                }
            }
            Ok(Err(e)) => CommandOutput::from_error(CommandError::Io { message: e.to_string() }),
            Err(_) => {
                debug!(program, timeout_secs = timeout.as_secs(), "command timed out");
                CommandOutput::from_error(CommandError::Timeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }
}
