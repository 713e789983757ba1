//! External command execution.
//!
//! Every interaction with the cluster (queries, `kubectl exec` into pods,
//! the exerciser run) goes through [`CommandExecutor`], so tests can swap in
//! [`crate::fakes::ScriptedExecutor`].

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ExecError;

/// Result type for command execution
pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when the process was killed by a signal).
    pub exit_code: i32,

    /// Raw stdout. Kept as bytes since capture payloads are binary.
    pub stdout: Vec<u8>,

    /// Captured stderr.
    pub stderr: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout decoded lossily as UTF-8.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

/// Runs an argv-style command line.
///
/// Implementations must be cancel-safe: dropping the returned future aborts
/// the command.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `argv` (first element is the program). `timeout` of `None`
    /// waits indefinitely.
    async fn execute(&self, argv: &[String], timeout: Option<Duration>)
        -> ExecResult<CommandOutput>;
}

/// [`CommandExecutor`] backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(
        &self,
        argv: &[String],
        timeout: Option<Duration>,
    ) -> ExecResult<CommandOutput> {
        let start = Instant::now();

        let (program, args) = argv.split_first().ok_or(ExecError::EmptyCommand)?;
        debug!(program = %program, args = ?args, "spawning command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ExecError::Timeout {
                    program: program.clone(),
                    timeout_ms: limit.as_millis() as u64,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| ExecError::Io {
            program: program.clone(),
            source,
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
