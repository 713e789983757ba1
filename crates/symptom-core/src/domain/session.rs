//! Collection session identity and lifecycle state machine.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CollectorConfig;
use crate::domain::error::{CollectorError, Result};

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub namespace: String,
    /// Pod name fragments, in the order given.
    pub fragments: Vec<String>,
}

impl SessionRequest {
    pub fn new(namespace: &str, fragments: Vec<String>) -> Self {
        Self {
            namespace: namespace.to_string(),
            fragments,
        }
    }

    /// Build a request from a space separated fragment list (`"uecm nim"`).
    pub fn parse(namespace: &str, fragments: &str) -> Self {
        Self::new(
            namespace,
            fragments.split_whitespace().map(str::to_string).collect(),
        )
    }
}

/// One collection run. Immutable once started.
#[derive(Debug, Clone)]
pub struct CollectionSession {
    pub id: Uuid,
    pub namespace: String,
    pub fragments: Vec<String>,
    pub started_at: DateTime<Utc>,
    /// Ceiling on the exercising phase.
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub keywords: Vec<String>,
    pub monitored_paths: Vec<PathBuf>,
}

impl CollectionSession {
    pub fn new(request: SessionRequest, config: &CollectorConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: request.namespace,
            fragments: request.fragments,
            started_at: Utc::now(),
            timeout: config.symptom.collection_timeout,
            poll_interval: config.symptom.check_interval,
            keywords: config.symptom.error_keywords.clone(),
            monitored_paths: config.paths.log_paths.clone(),
        }
    }

    /// First 8 characters of the session id.
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }

    /// Directory name for this session's artifacts.
    pub fn dir_name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.namespace,
            self.started_at.format("%Y%m%d-%H%M%S"),
            self.short_id()
        )
    }
}

/// Session lifecycle. Transitions are strictly linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Validating,
    Collecting,
    Exercising,
    Draining,
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Validating => "validating",
            SessionState::Collecting => "collecting",
            SessionState::Exercising => "exercising",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        }
    }

    /// The only state reachable from `self`, if any.
    pub fn successor(&self) -> Option<SessionState> {
        match self {
            SessionState::Created => Some(SessionState::Validating),
            SessionState::Validating => Some(SessionState::Collecting),
            SessionState::Collecting => Some(SessionState::Exercising),
            SessionState::Exercising => Some(SessionState::Draining),
            SessionState::Draining => Some(SessionState::Closed),
            SessionState::Closed => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A state entered at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: SessionState,
    pub at: DateTime<Utc>,
}

/// Enforces the linear lifecycle and records when each state was entered.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    history: Vec<StateTransition>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Created,
            history: vec![StateTransition {
                state: SessionState::Created,
                at: Utc::now(),
            }],
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Move to `next`, which must be the successor of the current state.
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        if self.state.successor() != Some(next) {
            return Err(CollectorError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.history.push(StateTransition {
            state: next,
            at: Utc::now(),
        });
        Ok(())
    }
}
