//! Per-deployment instrumentation toggles (tracing, packet capture).

use std::path::PathBuf;

use async_trait::async_trait;
use cluster_access::CommandOutput;
use futures::future::join_all;
use tracing::{debug, info};

use super::{render, EvidenceSource, SourceContext};
use crate::config::InstrumentConfig;
use crate::domain::{SourceError, SourceResult, TaskKind};
use crate::preflight::DeploymentReadiness;

/// Enables, disables and collects one kind of instrumentation on every
/// validated deployment.
///
/// Without an `enable` command the source does nothing but still takes
/// part in the session like any other task.
#[derive(Debug, Clone)]
pub struct InstrumentSource {
    kind: TaskKind,
    config: InstrumentConfig,
}

impl InstrumentSource {
    pub fn new(kind: TaskKind, config: InstrumentConfig) -> Self {
        Self { kind, config }
    }

    pub fn trace(config: InstrumentConfig) -> Self {
        Self::new(TaskKind::Trace, config)
    }

    pub fn capture(config: InstrumentConfig) -> Self {
        Self::new(TaskKind::Capture, config)
    }

    /// Run `template` once per target concurrently.
    async fn for_each_target(
        &self,
        ctx: &SourceContext,
        template: &[String],
    ) -> Vec<(DeploymentReadiness, SourceResult<CommandOutput>)> {
        let runs = ctx.targets.iter().map(|target| {
            let argv = render(
                template,
                &ctx.vars().with_target(&target.fragment, &target.deployment),
            );
            async move {
                let result = ctx
                    .run_command(self.name(), &argv, Some(ctx.command_timeout))
                    .await;
                (target.clone(), result)
            }
        });
        join_all(runs).await
    }

    fn partial(&self, total: usize, failures: Vec<String>) -> SourceResult<()> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SourceError::Partial {
                source_name: self.name().to_string(),
                total,
                failures,
            })
        }
    }

    async fn toggle(&self, ctx: &SourceContext, template: &[String]) -> SourceResult<()> {
        if template.is_empty() {
            return Ok(());
        }
        let results = self.for_each_target(ctx, template).await;
        let total = results.len();
        let failures = results
            .into_iter()
            .filter_map(|(target, result)| {
                result
                    .err()
                    .map(|e| format!("{}: {}", target.deployment, e))
            })
            .collect();
        self.partial(total, failures)
    }
}

#[async_trait]
impl EvidenceSource for InstrumentSource {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn kind(&self) -> TaskKind {
        self.kind
    }

    async fn enable(&self, ctx: &SourceContext) -> SourceResult<()> {
        if !self.config.is_configured() {
            debug!(source = %self.name(), "no enable command configured, skipping");
            return Ok(());
        }
        self.toggle(ctx, &self.config.enable).await?;
        info!(source = %self.name(), targets = ctx.targets.len(), "instrumentation enabled");
        Ok(())
    }

    async fn disable(&self, ctx: &SourceContext) -> SourceResult<()> {
        if !self.config.is_configured() {
            return Ok(());
        }
        self.toggle(ctx, &self.config.disable).await
    }

    async fn collect(&self, ctx: &SourceContext) -> SourceResult<Vec<PathBuf>> {
        if !self.config.is_configured() || self.config.collect.is_empty() {
            return Ok(Vec::new());
        }

        let results = self.for_each_target(ctx, &self.config.collect).await;
        let total = results.len();
        let mut stored = Vec::new();
        let mut failures = Vec::new();
        for (target, result) in results {
            let stored_path = match result {
                Ok(output) => {
                    let file_name =
                        format!("{}.{}", target.deployment, self.config.artifact_extension);
                    ctx.store_artifact(self.name(), self.name(), &file_name, &output.stdout)
                        .await
                }
                Err(e) => Err(e),
            };
            match stored_path {
                Ok(path) => stored.push(path),
                Err(e) => failures.push(format!("{}: {}", target.deployment, e)),
            }
        }

        self.partial(total, failures)?;
        Ok(stored)
    }
}
