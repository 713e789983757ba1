//! The workload-exercising test run.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use super::{render, EvidenceSource, SourceContext};
use crate::config::ExerciserConfig;
use crate::domain::{ExerciseOutcome, SourceResult, TaskKind};

const NAME: &str = "exerciser";

/// Runs the configured test command and reports how it ended.
///
/// The run has no timeout of its own. The session timeout bounds it, and
/// dropping the run kills the child process.
#[derive(Debug, Clone)]
pub struct Exerciser {
    config: ExerciserConfig,
}

impl Exerciser {
    pub fn new(config: ExerciserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EvidenceSource for Exerciser {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Exerciser
    }

    async fn run(&self, ctx: &SourceContext) -> Option<ExerciseOutcome> {
        if self.config.command.is_empty() {
            return Some(ExerciseOutcome::Error {
                detail: "no exerciser command configured".to_string(),
            });
        }

        let argv = render(&self.config.command, &ctx.vars());
        info!(command = %argv.join(" "), "starting exerciser");

        let outcome = match ctx.executor.execute(&argv, None).await {
            Ok(output) if output.success() => ExerciseOutcome::Passed {
                duration_ms: output.duration_ms,
            },
            Ok(output) => ExerciseOutcome::Failed {
                exit_code: output.exit_code,
                duration_ms: output.duration_ms,
            },
            Err(e) => ExerciseOutcome::Error {
                detail: e.to_string(),
            },
        };
        info!(outcome = %outcome, "exerciser finished");
        Some(outcome)
    }

    async fn collect(&self, ctx: &SourceContext) -> SourceResult<Vec<PathBuf>> {
        if self.config.collect.is_empty() {
            return Ok(Vec::new());
        }

        let argv = render(&self.config.collect, &ctx.vars());
        let output = ctx
            .run_command(NAME, &argv, Some(ctx.command_timeout))
            .await?;
        let path = ctx
            .store_artifact(NAME, NAME, &self.config.artifact_name, &output.stdout)
            .await?;
        Ok(vec![path])
    }
}
