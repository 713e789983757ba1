//! Detected error events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One detection, produced by exactly one watcher or evidence source.
///
/// Events from different sources are ordered by arrival at the aggregator,
/// not by `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Detection time at the producer.
    pub timestamp: DateTime<Utc>,
    /// Watched path or evidence source name.
    pub source: String,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(source: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.to_string(),
            message: message.to_string(),
        }
    }

    /// Single-line rendering used for `events.log`.
    pub fn log_line(&self) -> String {
        format!(
            "{} [{}] {}",
            self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            self.source,
            self.message
        )
    }
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.source,
            self.message
        )
    }
}
