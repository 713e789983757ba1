//! Session orchestration.
//!
//! Drives one session through
//! `Created -> Validating -> Collecting -> Exercising -> Draining -> Closed`.
//! Preflight runs before anything is spawned. Once it passes, every task
//! is spawned through a [`TaskBarrier`]; the exerciser's completion (or the
//! session timeout) triggers the stop broadcast, the barrier joins every
//! task, and only then is the event channel closed.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use cluster_access::{ClusterClient, CommandExecutor};
use tokio::sync::oneshot;
use tracing::{info, warn, Instrument};

use crate::aggregator::ErrorAggregator;
use crate::barrier::{JoinedTask, StopSignal, TaskBarrier};
use crate::config::CollectorConfig;
use crate::domain::{
    CollectionSession, CollectorError, Result, SessionMachine, SessionRequest, SessionState,
    SessionWarning, TaskKind,
};
use crate::evidence::{drive_source, EvidenceSource, Exerciser, InstrumentSource, SourceContext};
use crate::obs;
use crate::preflight::PreflightValidator;
use crate::report::{create_session_dir, write_session_files, SessionReport, REPORT_SCHEMA_VERSION};
use crate::watcher::{KeywordMatcher, LogWatcher};

/// Runs collection sessions against one cluster.
pub struct SessionOrchestrator {
    cluster: Arc<dyn ClusterClient>,
    executor: Arc<dyn CommandExecutor>,
    config: CollectorConfig,
}

impl SessionOrchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        executor: Arc<dyn CommandExecutor>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            cluster,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Run one session to completion.
    ///
    /// Returns `Err` only for validation failures and startup errors. A
    /// session that reaches `Closed` is `Ok` even when tasks reported
    /// warnings.
    pub async fn run(&self, request: SessionRequest) -> Result<SessionReport> {
        let session = CollectionSession::new(request, &self.config);
        let span = obs::session_span(&session.id.to_string(), &session.namespace);
        self.run_session(session).instrument(span).await
    }

    async fn run_session(&self, session: CollectionSession) -> Result<SessionReport> {
        let clock = Instant::now();
        let session_id = session.id.to_string();
        let mut machine = SessionMachine::new();
        obs::emit_session_started(&session_id, &session.namespace, &session.fragments);

        advance(&mut machine, SessionState::Validating, &session_id)?;
        let preflight = PreflightValidator::new(Arc::clone(&self.cluster))
            .validate(&session.namespace, &session.fragments)
            .await
            .map_err(|e| {
                warn!(error = %e, "preflight validation failed, no task started");
                CollectorError::ValidationFailed(e)
            })?;

        let output_dir = create_session_dir(&self.config.symptom.output_dir, &session.dir_name())
            .map_err(|source| CollectorError::OutputDir {
                path: self.config.symptom.output_dir.join(session.dir_name()),
                source,
            })?;
        info!(dir = %output_dir.display(), "session directory created");

        advance(&mut machine, SessionState::Collecting, &session_id)?;
        let stop = StopSignal::new();
        let mut barrier = TaskBarrier::new();
        let registry = barrier.registry();
        let aggregator = ErrorAggregator::start(
            self.config.symptom.channel_capacity,
            session
                .monitored_paths
                .iter()
                .map(|p| p.display().to_string()),
        );

        let ctx = Arc::new(SourceContext {
            session_id: session.short_id(),
            namespace: session.namespace.clone(),
            targets: preflight.targets.clone(),
            artifact_dir: output_dir.clone(),
            executor: Arc::clone(&self.executor),
            kubectl: self.config.kubernetes.kubectl.clone(),
            command_timeout: self.config.kubernetes.timeout,
        });

        let instruments: [Arc<dyn EvidenceSource>; 2] = [
            Arc::new(InstrumentSource::trace(self.config.sources.trace.clone())),
            Arc::new(InstrumentSource::capture(self.config.sources.capture.clone())),
        ];
        for source in instruments {
            let (ctx, listener, sink) = (Arc::clone(&ctx), stop.listener(), aggregator.sink());
            let name = source.name().to_string();
            barrier.spawn(source.kind(), &name, move |status| {
                drive_source(source, ctx, listener, sink, status, None)
            });
        }

        let matcher = Arc::new(KeywordMatcher::new(session.keywords.clone()));
        for path in &session.monitored_paths {
            let watcher = LogWatcher::new(path, Arc::clone(&matcher), session.poll_interval).await;
            let name = watcher.source().to_string();
            let (listener, sink) = (stop.listener(), aggregator.sink());
            barrier.spawn(TaskKind::LogWatcher, &name, move |status| {
                watcher.run(listener, sink, status)
            });
        }

        advance(&mut machine, SessionState::Exercising, &session_id)?;
        let (done_tx, done_rx) = oneshot::channel();
        {
            let source: Arc<dyn EvidenceSource> =
                Arc::new(Exerciser::new(self.config.sources.exerciser.clone()));
            let (ctx, listener, sink) = (Arc::clone(&ctx), stop.listener(), aggregator.sink());
            barrier.spawn(TaskKind::Exerciser, "exerciser", move |status| {
                drive_source(source, ctx, listener, sink, status, Some(done_tx))
            });
        }
        info!(tasks = barrier.started(), timeout = ?session.timeout, "collection running");

        let timed_out = match tokio::time::timeout(session.timeout, done_rx).await {
            Ok(Ok(outcome)) => {
                info!(outcome = %outcome, "exerciser completed, draining");
                false
            }
            Ok(Err(_)) => {
                warn!("exerciser ended without a completion signal, draining");
                false
            }
            Err(_) => {
                warn!(timeout = ?session.timeout, "session timeout reached, draining");
                true
            }
        };

        advance(&mut machine, SessionState::Draining, &session_id)?;
        stop.trigger();
        let started = barrier.started();
        let joined = barrier.join_all().await;
        info!(started, joined = joined.len(), "all tasks stopped");

        // Every sink lived inside a task, so none is left once joined.
        let buffer = aggregator.close().await?;
        advance(&mut machine, SessionState::Closed, &session_id)?;

        let tasks = registry.snapshot();
        let mut warnings = collect_warnings(&joined);
        for task in &tasks {
            if let Some(failure) = &task.failure {
                warnings.push(SessionWarning::PartialCollection {
                    task: task.name.clone(),
                    detail: failure.clone(),
                });
            }
        }
        if timed_out {
            warnings.push(SessionWarning::TimeoutExceeded {
                timeout_ms: session.timeout.as_millis() as u64,
            });
        }

        let mut report = SessionReport {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            session_id: session.id,
            namespace: session.namespace.clone(),
            fragments: session.fragments.clone(),
            targets: preflight.targets,
            started_at: session.started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            timed_out,
            exercise: joined
                .iter()
                .find(|t| t.kind == TaskKind::Exerciser)
                .and_then(|t| t.outcome.exercise.clone()),
            total_events: buffer.total,
            emitted_events: joined.iter().map(|t| t.outcome.emitted).sum(),
            event_counts: buffer.counts,
            events: buffer.events,
            tasks,
            warnings,
            artifacts: joined
                .iter()
                .flat_map(|t| t.outcome.artifacts.iter().cloned())
                .collect(),
            states: machine.history().to_vec(),
            output_dir: output_dir.clone(),
        };

        if report.emitted_events != report.total_events {
            warn!(
                emitted = report.emitted_events,
                received = report.total_events,
                "event totals disagree"
            );
        }

        match write_session_files(&output_dir, &report) {
            Ok(paths) => report.artifacts.extend(paths),
            Err(e) => {
                warn!(error = %e, "session report could not be written");
                report.warnings.push(SessionWarning::PartialCollection {
                    task: "report".to_string(),
                    detail: format!("{:#}", e),
                });
            }
        }

        for warning in &report.warnings {
            obs::emit_session_warning(&session_id, warning);
        }
        obs::emit_session_closed(
            &session_id,
            report.duration_ms,
            report.total_events,
            report.warnings.len(),
            report.timed_out,
        );
        Ok(report)
    }
}

fn advance(machine: &mut SessionMachine, next: SessionState, session_id: &str) -> Result<()> {
    let from = machine.state();
    machine.advance(next)?;
    obs::emit_session_transition(session_id, from, next);
    Ok(())
}

fn collect_warnings(joined: &[JoinedTask]) -> Vec<SessionWarning> {
    joined
        .iter()
        .flat_map(|t| t.outcome.warnings.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cluster_access::fakes::{MemoryCluster, ScriptedExecutor, ScriptedResponse};

    fn config(output: &std::path::Path, watched: Vec<std::path::PathBuf>) -> CollectorConfig {
        let mut config = CollectorConfig::default();
        config.symptom.output_dir = output.to_path_buf();
        config.symptom.check_interval = Duration::from_millis(10);
        config.symptom.collection_timeout = Duration::from_secs(5);
        config.paths.log_paths = watched;
        config
    }

    #[tokio::test]
    async fn test_session_walks_every_state() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new().with_deployment("miniudm", "uecm-deployment", 1, 1));
        let executor = Arc::new(ScriptedExecutor::new());

        let orchestrator = SessionOrchestrator::new(
            cluster,
            executor,
            config(&tmp.path().join("out"), vec![tmp.path().join("a.log")]),
        );
        let report = orchestrator
            .run(SessionRequest::parse("miniudm", "uecm"))
            .await
            .unwrap();

        let states: Vec<SessionState> = report.states.iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![
                SessionState::Created,
                SessionState::Validating,
                SessionState::Collecting,
                SessionState::Exercising,
                SessionState::Draining,
                SessionState::Closed,
            ]
        );
        // trace, capture, one watcher, exerciser
        assert_eq!(report.tasks.len(), 4);
        assert!(report.all_tasks_stopped());
        assert!(report.output_dir.join("report.json").is_file());
        assert!(!report.timed_out);
    }

    #[tokio::test]
    async fn test_exerciser_failure_still_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new().with_deployment("miniudm", "uecm-deployment", 1, 1));
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("pybot", ScriptedResponse::failure(2, "tests failed"));
        executor.respond("log.html", ScriptedResponse::failure(1, "no such file"));

        let orchestrator =
            SessionOrchestrator::new(cluster, executor, config(&tmp.path().join("out"), Vec::new()));
        let report = orchestrator
            .run(SessionRequest::parse("miniudm", "uecm"))
            .await
            .unwrap();

        assert!(matches!(
            report.exercise,
            Some(crate::domain::ExerciseOutcome::Failed { exit_code: 2, .. })
        ));
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, SessionWarning::PartialCollection { task, .. } if task == "exerciser")));
    }
}
