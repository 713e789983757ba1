//! Concurrent task bookkeeping types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::error::SessionWarning;

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Trace,
    Capture,
    Exerciser,
    LogWatcher,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Trace => "trace",
            TaskKind::Capture => "capture",
            TaskKind::Exerciser => "exerciser",
            TaskKind::LogWatcher => "log_watcher",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Task lifecycle: `Starting -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Registry entry for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: usize,
    pub kind: TaskKind,
    pub name: String,
    pub state: TaskState,
    /// Set when the task ended abnormally (panic, cancellation).
    pub failure: Option<String>,
}

/// How the exerciser run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExerciseOutcome {
    Passed { duration_ms: u64 },
    Failed { exit_code: i32, duration_ms: u64 },
    Error { detail: String },
    /// Stopped by the session before it finished.
    Cancelled,
}

impl ExerciseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExerciseOutcome::Passed { .. })
    }
}

impl std::fmt::Display for ExerciseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExerciseOutcome::Passed { duration_ms } => write!(f, "passed in {}ms", duration_ms),
            ExerciseOutcome::Failed {
                exit_code,
                duration_ms,
            } => write!(f, "failed with exit code {} after {}ms", exit_code, duration_ms),
            ExerciseOutcome::Error { detail } => write!(f, "error: {}", detail),
            ExerciseOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// What a task hands back when it reaches `Stopped`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutcome {
    pub warnings: Vec<SessionWarning>,
    pub artifacts: Vec<PathBuf>,
    /// Events this task successfully sent to the aggregator.
    pub emitted: u64,
    /// Only set by the exerciser task.
    pub exercise: Option<ExerciseOutcome>,
}
