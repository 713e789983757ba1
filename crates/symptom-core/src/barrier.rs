//! Task fan-out, stop broadcast and join barrier.
//!
//! Every concurrent task of a session is spawned through [`TaskBarrier`],
//! which registers it in a [`TaskRegistry`] and keeps its `JoinHandle` in a
//! `JoinSet`. [`TaskBarrier::join_all`] returns only after every spawned
//! task has finished, so the number of tasks started always equals the
//! number joined. The event channel is closed strictly after that point.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::{TaskKind, TaskOutcome, TaskRecord, TaskState};

/// Broadcast side of the session stop signal.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn listener(&self) -> StopListener {
        StopListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Tell every listener to stop. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving side of the stop signal, one per task.
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopListener {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the stop signal has been triggered.
    ///
    /// Also resolves if the [`StopSignal`] was dropped, so a task can never
    /// outlive its session.
    pub async fn stopped(&mut self) {
        // Err means the sender is gone; treat that as stop as well.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Shared view of every task's lifecycle state.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    records: Mutex<Vec<TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, kind: TaskKind, name: &str) -> usize {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let id = records.len();
        records.push(TaskRecord {
            id,
            kind,
            name: name.to_string(),
            state: TaskState::Starting,
            failure: None,
        });
        id
    }

    fn set_state(&self, id: usize, state: TaskState) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = records.get_mut(id) {
            // States only move forward.
            if state > record.state {
                record.state = state;
            }
        }
    }

    fn set_failure(&self, id: usize, failure: String) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = records.get_mut(id) {
            record.failure = Some(failure);
            record.state = TaskState::Stopped;
        }
    }

    pub fn snapshot(&self) -> Vec<TaskRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks that reached `Stopped`.
    pub fn stopped_count(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.state == TaskState::Stopped)
            .count()
    }
}

/// Handle a task uses to report its own lifecycle transitions.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    id: usize,
    registry: Arc<TaskRegistry>,
}

impl TaskStatus {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn running(&self) {
        self.registry.set_state(self.id, TaskState::Running);
    }

    pub fn stopping(&self) {
        self.registry.set_state(self.id, TaskState::Stopping);
    }

    pub fn stopped(&self) {
        self.registry.set_state(self.id, TaskState::Stopped);
    }
}

/// Joined result of one task.
#[derive(Debug, Clone)]
pub struct JoinedTask {
    pub id: usize,
    pub kind: TaskKind,
    pub name: String,
    pub outcome: TaskOutcome,
}

/// Counting barrier over every task started for a session.
pub struct TaskBarrier {
    registry: Arc<TaskRegistry>,
    set: JoinSet<(usize, Result<TaskOutcome, String>)>,
}

impl Default for TaskBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBarrier {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(TaskRegistry::new()),
            set: JoinSet::new(),
        }
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        Arc::clone(&self.registry)
    }

    /// Number of tasks spawned so far.
    pub fn started(&self) -> usize {
        self.registry.len()
    }

    /// Register a task and spawn the future built by `make`.
    ///
    /// The task is marked `Stopped` when its future returns, whatever it
    /// reported along the way.
    pub fn spawn<F, Fut>(&mut self, kind: TaskKind, name: &str, make: F) -> usize
    where
        F: FnOnce(TaskStatus) -> Fut,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        let id = self.registry.register(kind, name);
        let status = TaskStatus {
            id,
            registry: Arc::clone(&self.registry),
        };
        let fut = make(status.clone());
        debug!(task_id = id, kind = %kind, name = %name, "task spawned");
        self.set.spawn(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(outcome) => {
                    status.stopped();
                    (id, Ok(outcome))
                }
                Err(panic) => (id, Err(panic_message(panic.as_ref()))),
            }
        });
        id
    }

    /// Wait for every spawned task to finish.
    ///
    /// A panicked task still counts as joined; its record is set to
    /// `Stopped` with a failure note and it contributes an empty outcome.
    pub async fn join_all(mut self) -> Vec<JoinedTask> {
        let mut outcomes: Vec<Option<TaskOutcome>> = vec![None; self.registry.len()];

        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok((id, Ok(outcome))) => {
                    if let Some(slot) = outcomes.get_mut(id) {
                        *slot = Some(outcome);
                    }
                }
                Ok((id, Err(panic))) => {
                    warn!(task_id = id, panic = %panic, "task panicked");
                    self.registry.set_failure(id, format!("panicked: {}", panic));
                }
                Err(err) => {
                    warn!(error = %err, "task ended abnormally");
                }
            }
        }

        // The set is drained; any record not yet stopped belongs to a task
        // that was torn down without reporting.
        for record in self.registry.snapshot() {
            if record.state != TaskState::Stopped {
                self.registry
                    .set_failure(record.id, "task ended without reporting".to_string());
            }
        }

        self.registry
            .snapshot()
            .into_iter()
            .map(|record| JoinedTask {
                outcome: outcomes
                    .get_mut(record.id)
                    .and_then(Option::take)
                    .unwrap_or_default(),
                id: record.id,
                kind: record.kind,
                name: record.name,
            })
            .collect()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
