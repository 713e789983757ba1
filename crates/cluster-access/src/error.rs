//! Error types for cluster-access

use thiserror::Error;

/// Errors raised while running an external command
#[derive(Error, Debug)]
pub enum ExecError {
    /// No executable was supplied
    #[error("empty command line")]
    EmptyCommand,

    /// The process could not be spawned
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process did not finish inside its deadline
    #[error("'{program}' timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    /// Waiting on the process failed
    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur while querying the cluster
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The underlying command could not be executed
    #[error("cluster command failed: {0}")]
    Exec(#[from] ExecError),

    /// The command ran but the API server rejected the request
    #[error("cluster request '{request}' failed (exit {exit_code}): {stderr}")]
    Request {
        request: String,
        exit_code: i32,
        stderr: String,
    },

    /// The response could not be decoded
    #[error("failed to parse cluster response: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        ClusterError::Parse(err.to_string())
    }
}
