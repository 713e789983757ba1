//! In-memory fakes for the cluster seams (testing only)
//!
//! Provides `MemoryCluster` and `ScriptedExecutor` that satisfy the trait
//! contracts without a cluster or any external binaries.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{ClusterClient, ClusterResult, Deployment};
use crate::error::{ClusterError, ExecError};
use crate::exec::{CommandExecutor, CommandOutput, ExecResult};

// ---------------------------------------------------------------------------
// MemoryCluster
// ---------------------------------------------------------------------------

/// In-memory cluster backed by a `HashMap<namespace, deployments>`.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    namespaces: Mutex<HashMap<String, Vec<Deployment>>>,
    unreachable: Mutex<bool>,
    queries: Mutex<u64>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or keep) an empty namespace.
    pub fn with_namespace(self, namespace: &str) -> Self {
        self.namespaces
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default();
        self
    }

    /// Add a deployment, creating its namespace if needed.
    pub fn with_deployment(self, namespace: &str, name: &str, ready: u32, desired: u32) -> Self {
        self.namespaces
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .push(Deployment::new(name, namespace, ready, desired));
        self
    }

    /// Make every subsequent query fail as if the API server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }

    /// Number of queries served so far.
    pub fn query_count(&self) -> u64 {
        *self.queries.lock().unwrap()
    }

    fn check_reachable(&self) -> ClusterResult<()> {
        *self.queries.lock().unwrap() += 1;
        if *self.unreachable.lock().unwrap() {
            return Err(ClusterError::Request {
                request: "memory".to_string(),
                exit_code: 1,
                stderr: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn namespace_exists(&self, namespace: &str) -> ClusterResult<bool> {
        self.check_reachable()?;
        Ok(self.namespaces.lock().unwrap().contains_key(namespace))
    }

    async fn list_deployments(&self, namespace: &str) -> ClusterResult<Vec<Deployment>> {
        self.check_reachable()?;
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

/// Canned response for commands matching a pattern.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
    /// Simulated run time before the response is returned.
    pub delay: Option<Duration>,
    /// Never complete; only cancellation ends the call.
    pub hang: bool,
    /// Fail before the process "starts".
    pub spawn_error: bool,
}

impl ScriptedResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn stdout(stdout: &str) -> Self {
        Self {
            stdout: stdout.as_bytes().to_vec(),
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr: stderr.to_string(),
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn spawn_error() -> Self {
        Self {
            spawn_error: true,
            ..Self::default()
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Executor that records every call and replies from a script.
///
/// Rules are matched in insertion order against the space-joined argv; the
/// first rule whose pattern is a substring wins. Unmatched commands succeed
/// with empty output.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<(String, ScriptedResponse)>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, response: ScriptedResponse) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), response));
    }

    /// Every argv seen so far, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls whose joined argv contains `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|argv| argv.join(" ").contains(pattern))
            .count()
    }

    fn lookup(&self, line: &str) -> ScriptedResponse {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        argv: &[String],
        timeout: Option<Duration>,
    ) -> ExecResult<CommandOutput> {
        if argv.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        self.calls.lock().unwrap().push(argv.to_vec());

        let line = argv.join(" ");
        let response = self.lookup(&line);

        if response.spawn_error {
            return Err(ExecError::Spawn {
                program: argv[0].clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted"),
            });
        }

        let work = async {
            if response.hang {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = response.delay {
                tokio::time::sleep(delay).await;
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| ExecError::Timeout {
                    program: argv[0].clone(),
                    timeout_ms: limit.as_millis() as u64,
                })?,
            None => work.await,
        }

        Ok(CommandOutput {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            duration_ms: response.delay.map(|d| d.as_millis() as u64).unwrap_or(0),
        })
    }
}
