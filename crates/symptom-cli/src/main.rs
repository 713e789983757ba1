//! Symptom Collection CLI
//!
//! The `symptom-collection` command runs time-boxed evidence collection
//! sessions against Kubernetes workloads.
//!
//! ## Commands
//!
//! - `collect`: validate the targets, run the exerciser with tracing,
//!   capture and log watchers active, and write the session report
//! - `deployments`: list deployments with readiness, age and image

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cluster_access::{ClusterClient, CommandExecutor, KubectlClient, ProcessExecutor};
use symptom_core::config::parse_duration;
use symptom_core::timefmt::format_age;
use symptom_core::{CollectorConfig, LogFormat, SessionOrchestrator, SessionReport, SessionRequest};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "symptom-collection")]
#[command(author = "Symptom Collection Developers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Collect diagnostic evidence from Kubernetes workloads", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: search ./config.yaml, ./configs/config.yaml, ...)
    #[arg(short, long, global = true, env = "SYMPTOM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a symptom collection session
    Collect {
        /// Target namespace (default: kubernetes.namespace from config)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Space-separated pod name fragments, e.g. "uecm nim"
        #[arg(short, long)]
        pods: String,

        /// Exercising phase ceiling, e.g. 90s or 10m
        #[arg(long)]
        timeout: Option<String>,

        /// Root directory for session artifacts
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full session report as JSON instead of a summary
        #[arg(long)]
        report_json: bool,
    },

    /// List deployments in a namespace
    Deployments {
        /// Namespace (default: kubernetes.namespace from config)
        #[arg(short, long)]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CollectorConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        config.logging.tracing_level()
    };
    symptom_core::init_tracing(cli.json || config.logging.format == LogFormat::Json, level);

    let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessExecutor::new());
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubectlClient::new(
        Arc::clone(&executor),
        &config.kubernetes.kubectl,
        config.kubernetes.timeout,
    ));

    match cli.command {
        Commands::Collect {
            namespace,
            pods,
            timeout,
            output,
            report_json,
        } => {
            let config = apply_collect_overrides(config, timeout.as_deref(), output)?;
            let namespace = namespace.unwrap_or_else(|| config.kubernetes.namespace.clone());
            let report = cmd_collect(cluster, executor, config, &namespace, &pods).await?;
            if report_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for line in report.summary_lines() {
                    println!("{}", line);
                }
            }
            Ok(())
        }
        Commands::Deployments { namespace } => {
            let namespace = namespace.unwrap_or_else(|| config.kubernetes.namespace.clone());
            let listing = cmd_deployments(cluster.as_ref(), &namespace).await?;
            print!("{}", listing);
            Ok(())
        }
    }
}

/// Fold command-line overrides into the loaded configuration.
fn apply_collect_overrides(
    mut config: CollectorConfig,
    timeout: Option<&str>,
    output: Option<PathBuf>,
) -> Result<CollectorConfig> {
    if let Some(raw) = timeout {
        config.symptom.collection_timeout =
            parse_duration(raw).with_context(|| format!("Invalid --timeout '{}'", raw))?;
    }
    if let Some(dir) = output {
        config.symptom.output_dir = dir;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn cmd_collect(
    cluster: Arc<dyn ClusterClient>,
    executor: Arc<dyn CommandExecutor>,
    config: CollectorConfig,
    namespace: &str,
    pods: &str,
) -> Result<SessionReport> {
    let request = SessionRequest::parse(namespace, pods);
    info!(namespace = %namespace, pods = %pods, "starting symptom collection");

    let orchestrator = SessionOrchestrator::new(cluster, executor, config);
    let report = orchestrator
        .run(request)
        .await
        .context("Symptom collection failed")?;
    Ok(report)
}

/// Render the deployment listing printed by `deployments`.
async fn cmd_deployments(cluster: &dyn ClusterClient, namespace: &str) -> Result<String> {
    let deployments = cluster
        .list_deployments(namespace)
        .await
        .with_context(|| format!("Failed to list deployments in namespace '{}'", namespace))?;

    if deployments.is_empty() {
        return Ok(format!("No deployments found in namespace '{}'\n", namespace));
    }

    let mut out = format!(
        "Found {} deployment(s) in namespace '{}':\n\n",
        deployments.len(),
        namespace
    );
    for d in &deployments {
        out.push_str(&format!("{}\n", d.name));
        out.push_str(&format!(
            "  Replicas: {}/{}\n",
            d.ready_replicas, d.desired_replicas
        ));
        if let Some(created) = d.created_at {
            out.push_str(&format!("  Age:      {}\n", format_age(created)));
        }
        if let Some(image) = &d.image {
            out.push_str(&format!("  Image:    {}\n", image));
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_access::fakes::{MemoryCluster, ScriptedExecutor};
    use std::time::Duration;

    #[test]
    fn test_cli_parses_collect() {
        let cli = Cli::try_parse_from([
            "symptom-collection",
            "-v",
            "collect",
            "-n",
            "miniudm",
            "-p",
            "uecm nim",
            "--timeout",
            "90s",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Collect {
                namespace,
                pods,
                timeout,
                ..
            } => {
                assert_eq!(namespace.as_deref(), Some("miniudm"));
                assert_eq!(pods, "uecm nim");
                assert_eq!(timeout.as_deref(), Some("90s"));
            }
            _ => panic!("expected collect"),
        }
    }

    #[test]
    fn test_collect_overrides() {
        let config = apply_collect_overrides(
            CollectorConfig::default(),
            Some("2m"),
            Some(PathBuf::from("/tmp/out")),
        )
        .unwrap();
        assert_eq!(config.symptom.collection_timeout, Duration::from_secs(120));
        assert_eq!(config.symptom.output_dir, PathBuf::from("/tmp/out"));

        assert!(apply_collect_overrides(CollectorConfig::default(), Some("soon"), None).is_err());
    }

    #[tokio::test]
    async fn test_collect_fails_on_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = CollectorConfig::default();
        config.symptom.output_dir = tmp.path().join("out");

        let cluster = Arc::new(MemoryCluster::new().with_namespace("default"));
        let executor = Arc::new(ScriptedExecutor::new());
        let err = cmd_collect(cluster, executor, config, "default", "uecm")
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("uecm"));
        assert!(!tmp.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_deployments_listing() {
        let cluster = MemoryCluster::new()
            .with_namespace("empty")
            .with_deployment("miniudm", "uecm-deployment", 1, 2);

        let listing = cmd_deployments(&cluster, "miniudm").await.unwrap();
        assert!(listing.starts_with("Found 1 deployment(s) in namespace 'miniudm'"));
        assert!(listing.contains("Replicas: 1/2"));

        let listing = cmd_deployments(&cluster, "empty").await.unwrap();
        assert_eq!(listing, "No deployments found in namespace 'empty'\n");
    }
}
