//! Evidence sources: tracing, packet capture and the exerciser.
//!
//! Every source runs as one task driven by [`drive_source`]:
//!
//! 1. `enable` (failure is a warning plus an error event, never fatal)
//! 2. `run`, raced against the stop signal
//! 3. wait for stop
//! 4. `disable` and `collect` (failures are partial-collection warnings)
//!
//! Only the exerciser produces a completion signal; instrumentation
//! sources stay enabled until the session stops them.

mod exerciser;
mod instrument;
pub mod template;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cluster_access::{CommandExecutor, CommandOutput};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::aggregator::EventSink;
use crate::barrier::{StopListener, TaskStatus};
use crate::domain::{
    ErrorEvent, ExerciseOutcome, SessionWarning, SourceError, SourceResult, TaskKind, TaskOutcome,
};
use crate::preflight::DeploymentReadiness;

pub use exerciser::Exerciser;
pub use instrument::InstrumentSource;
pub use template::{render, TemplateVars};

/// Everything a source needs to act on the validated targets.
#[derive(Clone)]
pub struct SourceContext {
    pub session_id: String,
    pub namespace: String,
    pub targets: Vec<DeploymentReadiness>,
    /// Session output directory. Artifacts go below it.
    pub artifact_dir: PathBuf,
    pub executor: Arc<dyn CommandExecutor>,
    /// Binary rendered for `{kubectl}` in command templates.
    pub kubectl: String,
    /// Ceiling on enable/disable/collect commands. The exerciser run itself
    /// is bounded by the session timeout instead.
    pub command_timeout: Duration,
}

impl SourceContext {
    pub fn vars(&self) -> TemplateVars {
        TemplateVars::new(&self.namespace, &self.session_id).with_kubectl(&self.kubectl)
    }

    /// Run one rendered command, mapping failures to [`SourceError`].
    pub async fn run_command(
        &self,
        source_name: &str,
        argv: &[String],
        timeout: Option<Duration>,
    ) -> SourceResult<CommandOutput> {
        debug!(source = %source_name, command = %argv.join(" "), "running source command");
        let output = self
            .executor
            .execute(argv, timeout)
            .await
            .map_err(|error| SourceError::Exec {
                source_name: source_name.to_string(),
                error,
            })?;

        if !output.success() {
            return Err(SourceError::NonZeroExit {
                source_name: source_name.to_string(),
                command: argv.join(" "),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Write `bytes` to `<artifact_dir>/<sub>/<file_name>`.
    pub async fn store_artifact(
        &self,
        source_name: &str,
        sub: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> SourceResult<PathBuf> {
        let dir = self.artifact_dir.join(sub);
        let path = dir.join(file_name);
        let artifact_err = |path: &Path, error: std::io::Error| SourceError::Artifact {
            source_name: source_name.to_string(),
            path: path.to_path_buf(),
            error,
        };

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| artifact_err(dir.as_path(), e))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| artifact_err(path.as_path(), e))?;
        Ok(path)
    }
}

/// One kind of evidence.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> TaskKind;

    /// Switch the instrumentation on. Sources without anything to switch
    /// on keep the default.
    async fn enable(&self, _ctx: &SourceContext) -> SourceResult<()> {
        Ok(())
    }

    /// Long-running part. Returns the exerciser outcome for sources that
    /// signal completion, `None` otherwise.
    async fn run(&self, _ctx: &SourceContext) -> Option<ExerciseOutcome> {
        None
    }

    async fn disable(&self, _ctx: &SourceContext) -> SourceResult<()> {
        Ok(())
    }

    /// Copy produced data into the session directory.
    async fn collect(&self, _ctx: &SourceContext) -> SourceResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

/// Task body for one evidence source.
///
/// `done` is fulfilled as soon as `run` yields an outcome (or the source
/// failed to enable), before the task waits for the stop signal.
pub async fn drive_source(
    source: Arc<dyn EvidenceSource>,
    ctx: Arc<SourceContext>,
    mut stop: StopListener,
    sink: EventSink,
    status: TaskStatus,
    mut done: Option<oneshot::Sender<ExerciseOutcome>>,
) -> TaskOutcome {
    let name = source.name().to_string();
    let mut outcome = TaskOutcome::default();

    let enabled = match source.enable(&ctx).await {
        Ok(()) => true,
        Err(e) => {
            warn!(source = %name, error = %e, "source could not be enabled, continuing without it");
            outcome.warnings.push(SessionWarning::SourceEnable {
                source: name.clone(),
                detail: e.to_string(),
            });
            if sink.emit(ErrorEvent::new(&name, &e.to_string())).await.is_ok() {
                outcome.emitted += 1;
            }
            false
        }
    };
    status.running();

    let result = if enabled {
        tokio::select! {
            result = source.run(&ctx) => result,
            _ = stop.stopped() => done.as_ref().map(|_| ExerciseOutcome::Cancelled),
        }
    } else {
        done.as_ref().map(|_| ExerciseOutcome::Error {
            detail: format!("{} was not enabled", name),
        })
    };

    if let Some(result) = result {
        debug!(source = %name, outcome = %result, "source finished");
        if let Some(tx) = done.take() {
            // The receiver is gone once the session timed out.
            let _ = tx.send(result.clone());
        }
        outcome.exercise = Some(result);
    }

    stop.stopped().await;
    status.stopping();

    if let Err(e) = source.disable(&ctx).await {
        warn!(source = %name, error = %e, "source did not disable cleanly");
        outcome.warnings.push(SessionWarning::PartialCollection {
            task: name.clone(),
            detail: e.to_string(),
        });
    }
    match source.collect(&ctx).await {
        Ok(paths) => outcome.artifacts.extend(paths),
        Err(e) => {
            warn!(source = %name, error = %e, "source artifacts incomplete");
            outcome.warnings.push(SessionWarning::PartialCollection {
                task: name.clone(),
                detail: e.to_string(),
            });
        }
    }

    drop(sink);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cluster_access::fakes::{ScriptedExecutor, ScriptedResponse};

    use crate::aggregator::ErrorAggregator;
    use crate::barrier::{StopSignal, TaskBarrier};
    use crate::config::{ExerciserConfig, InstrumentConfig};

    fn context(executor: Arc<ScriptedExecutor>, dir: &Path) -> Arc<SourceContext> {
        Arc::new(SourceContext {
            session_id: "0badf00d".to_string(),
            namespace: "miniudm".to_string(),
            targets: vec![DeploymentReadiness {
                fragment: "uecm".to_string(),
                deployment: "uecm-deployment".to_string(),
                ready: 1,
                desired: 1,
            }],
            artifact_dir: dir.to_path_buf(),
            executor,
            kubectl: "kubectl".to_string(),
            command_timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn test_enable_failure_is_a_warning_and_an_event() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("capture-on", ScriptedResponse::failure(1, "tcpdump missing"));
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(executor, dir.path());

        let source: Arc<dyn EvidenceSource> = Arc::new(InstrumentSource::capture(InstrumentConfig {
            enable: vec!["capture-on".to_string()],
            disable: vec!["capture-off".to_string()],
            ..InstrumentConfig::default()
        }));

        let aggregator = ErrorAggregator::start(8, Vec::new());
        let stop = StopSignal::new();
        let mut barrier = TaskBarrier::new();
        let (listener, sink) = (stop.listener(), aggregator.sink());
        barrier.spawn(TaskKind::Capture, "capture", move |status| {
            drive_source(source, ctx, listener, sink, status, None)
        });

        stop.trigger();
        let joined = barrier.join_all().await;
        let buffer = aggregator.close().await.unwrap();

        let outcome = &joined[0].outcome;
        assert!(matches!(
            outcome.warnings[0],
            SessionWarning::SourceEnable { ref source, .. } if source == "capture"
        ));
        assert_eq!(outcome.emitted, 1);
        assert_eq!(buffer.counts["capture"], 1);
    }

    #[tokio::test]
    async fn test_exerciser_signals_completion_before_stop() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("pybot", ScriptedResponse::ok().after(Duration::from_millis(20)));
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(executor, dir.path());
        let source: Arc<dyn EvidenceSource> = Arc::new(Exerciser::new(ExerciserConfig {
            collect: Vec::new(),
            ..ExerciserConfig::default()
        }));

        let aggregator = ErrorAggregator::start(8, Vec::new());
        let stop = StopSignal::new();
        let mut barrier = TaskBarrier::new();
        let (done_tx, done_rx) = oneshot::channel();
        let (listener, sink) = (stop.listener(), aggregator.sink());
        barrier.spawn(TaskKind::Exerciser, "exerciser", move |status| {
            drive_source(source, ctx, listener, sink, status, Some(done_tx))
        });

        let outcome = done_rx.await.unwrap();
        assert!(outcome.is_success());
        assert!(!stop.is_triggered());

        stop.trigger();
        let joined = barrier.join_all().await;
        assert_eq!(joined[0].outcome.exercise, Some(outcome));
        aggregator.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_running_exerciser() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("pybot", ScriptedResponse::hanging());
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(executor, dir.path());
        let source: Arc<dyn EvidenceSource> = Arc::new(Exerciser::new(ExerciserConfig::default()));

        let aggregator = ErrorAggregator::start(8, Vec::new());
        let stop = StopSignal::new();
        let mut barrier = TaskBarrier::new();
        let (done_tx, _done_rx) = oneshot::channel();
        let (listener, sink) = (stop.listener(), aggregator.sink());
        barrier.spawn(TaskKind::Exerciser, "exerciser", move |status| {
            drive_source(source, ctx, listener, sink, status, Some(done_tx))
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.trigger();
        let joined = barrier.join_all().await;

        let outcome = &joined[0].outcome;
        assert_eq!(outcome.exercise, Some(ExerciseOutcome::Cancelled));
        // The test log is still fetched after cancellation.
        assert_eq!(outcome.artifacts.len(), 1);
        aggregator.close().await.unwrap();
    }
}
