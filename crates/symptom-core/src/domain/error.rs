//! Error taxonomy for symptom collection.
//!
//! Only [`ValidationError`] is fatal for a session. Everything that goes
//! wrong once tasks are running is folded into a [`SessionWarning`] and
//! reported alongside the collected evidence.

use std::path::PathBuf;

use cluster_access::{ClusterError, ExecError};
use serde::{Deserialize, Serialize};

/// Preflight failures. Any of these aborts the session before a task starts.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("namespace {namespace} does not exist")]
    NamespaceNotFound { namespace: String },

    #[error("no deployment in namespace {namespace} matches '{fragment}'")]
    DeploymentNotFound { namespace: String, fragment: String },

    #[error("deployment {deployment} is not ready ({ready}/{desired} replicas)")]
    DeploymentNotReady {
        deployment: String,
        ready: u32,
        desired: u32,
    },

    #[error("'{fragment}' matches more than one deployment: {}", .matches.join(", "))]
    AmbiguousDeployment {
        fragment: String,
        matches: Vec<String>,
    },

    #[error("no pod name fragments given")]
    NoFragments,

    #[error("cluster query failed: {0}")]
    Cluster(#[from] ClusterError),
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid duration '{0}' (expected e.g. 500ms, 1s, 10m, 2h)")]
    InvalidDuration(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Failure of an evidence source action (enable, run, disable, collect).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{source_name}: command failed to run: {error}")]
    Exec {
        source_name: String,
        #[source]
        error: ExecError,
    },

    #[error("{source_name}: '{command}' exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        source_name: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("{source_name}: failed to store artifact {path}: {error}")]
    Artifact {
        source_name: String,
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("{source_name}: {} of {} targets failed: {}", .failures.len(), .total, .failures.join("; "))]
    Partial {
        source_name: String,
        total: usize,
        failures: Vec<String>,
    },
}

/// Result type for evidence source actions.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// A watched path could not be inspected. The watcher keeps polling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    #[error("{path} does not exist")]
    Missing { path: String },

    #[error("{path} is unreadable: {reason}")]
    Unreadable { path: String, reason: String },
}

impl WatchError {
    pub fn path(&self) -> &str {
        match self {
            WatchError::Missing { path } | WatchError::Unreadable { path, .. } => path,
        }
    }
}

/// Error aggregator lifecycle violations.
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("cannot close event channel: {live} producer(s) still hold a sender")]
    ProducersStillActive { live: usize },

    #[error("event consumer terminated abnormally: {0}")]
    ConsumerFailed(String),

    #[error("event channel is closed")]
    ChannelClosed,
}

/// Fatal session errors.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("aggregator error: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl CollectorError {
    /// Whether this error stems from the preflight gate.
    pub fn is_validation(&self) -> bool {
        matches!(self, CollectorError::ValidationFailed(_))
    }
}

/// Result type for session-level operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Non-fatal conditions accumulated into the session report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionWarning {
    /// An evidence source could not be enabled; the session ran without it.
    SourceEnable { source: String, detail: String },
    /// A watched path was missing or unreadable for some time.
    Watch { path: String, detail: String },
    /// A task failed to stop, clean up or store its artifacts.
    PartialCollection { task: String, detail: String },
    /// The exerciser did not finish before the session timeout.
    TimeoutExceeded { timeout_ms: u64 },
}

impl SessionWarning {
    pub fn from_watch(err: &WatchError) -> Self {
        SessionWarning::Watch {
            path: err.path().to_string(),
            detail: err.to_string(),
        }
    }
}

impl std::fmt::Display for SessionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionWarning::SourceEnable { source, detail } => {
                write!(f, "source {} not enabled: {}", source, detail)
            }
            SessionWarning::Watch { path, detail } => write!(f, "watch {}: {}", path, detail),
            SessionWarning::PartialCollection { task, detail } => {
                write!(f, "partial collection from {}: {}", task, detail)
            }
            SessionWarning::TimeoutExceeded { timeout_ms } => {
                write!(f, "exerciser did not finish within {}ms", timeout_ms)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::DeploymentNotFound {
            namespace: "default".to_string(),
            fragment: "uecm".to_string(),
        };
        assert!(err.to_string().contains("uecm"));

        let err = ValidationError::AmbiguousDeployment {
            fragment: "nim".to_string(),
            matches: vec!["nim-a".to_string(), "nim-b".to_string()],
        };
        assert!(err.to_string().contains("nim-a, nim-b"));
    }

    #[test]
    fn test_collector_error_classification() {
        let err: CollectorError = ValidationError::NoFragments.into();
        assert!(err.is_validation());

        let err: CollectorError = AggregatorError::ProducersStillActive { live: 2 }.into();
        assert!(!err.is_validation());
        assert!(err.to_string().contains("2 producer(s)"));
    }

    #[test]
    fn test_warning_serializes_with_kind_tag() {
        let warning = SessionWarning::TimeoutExceeded { timeout_ms: 600_000 };
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["kind"], "timeout_exceeded");
        assert_eq!(json["timeout_ms"], 600_000);
    }

    #[test]
    fn test_watch_warning_keeps_path() {
        let err = WatchError::Missing {
            path: "/Envoy".to_string(),
        };
        let warning = SessionWarning::from_watch(&err);
        assert_eq!(
            warning,
            SessionWarning::Watch {
                path: "/Envoy".to_string(),
                detail: "/Envoy does not exist".to_string(),
            }
        );
    }
}
