//! `kubectl`-backed [`ClusterClient`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::client::{ClusterClient, ClusterResult, Deployment};
use crate::error::ClusterError;
use crate::exec::{CommandExecutor, CommandOutput};

/// Talks to the API server through the `kubectl` binary.
pub struct KubectlClient {
    executor: Arc<dyn CommandExecutor>,
    kubectl: String,
    timeout: Duration,
}

impl KubectlClient {
    pub fn new(executor: Arc<dyn CommandExecutor>, kubectl: &str, timeout: Duration) -> Self {
        Self {
            executor,
            kubectl: kubectl.to_string(),
            timeout,
        }
    }

    async fn kubectl(&self, args: &[&str]) -> ClusterResult<CommandOutput> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(self.kubectl.clone());
        argv.extend(args.iter().map(|a| a.to_string()));
        debug!(argv = ?argv, "kubectl request");
        Ok(self.executor.execute(&argv, Some(self.timeout)).await?)
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn namespace_exists(&self, namespace: &str) -> ClusterResult<bool> {
        let out = self
            .kubectl(&["get", "namespace", namespace, "-o", "name"])
            .await?;
        if out.success() {
            return Ok(true);
        }
        if out.stderr.contains("NotFound") || out.stderr.contains("not found") {
            return Ok(false);
        }
        Err(ClusterError::Request {
            request: format!("get namespace {}", namespace),
            exit_code: out.exit_code,
            stderr: out.stderr.trim().to_string(),
        })
    }

    async fn list_deployments(&self, namespace: &str) -> ClusterResult<Vec<Deployment>> {
        let out = self
            .kubectl(&["get", "deployments", "-n", namespace, "-o", "json"])
            .await?;
        if !out.success() {
            return Err(ClusterError::Request {
                request: format!("get deployments -n {}", namespace),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        parse_deployment_list(&out.stdout, namespace)
    }
}

// ---------------------------------------------------------------------------
// Wire format (subset of apps/v1 DeploymentList)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DeploymentList {
    #[serde(default)]
    items: Vec<DeploymentItem>,
}

#[derive(Debug, Deserialize)]
struct DeploymentItem {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: DeploymentSpec,
    #[serde(default)]
    status: DeploymentStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentSpec {
    #[serde(default)]
    replicas: Option<u32>,
    #[serde(default)]
    template: Option<PodTemplate>,
}

#[derive(Debug, Deserialize)]
struct PodTemplate {
    #[serde(default)]
    spec: Option<PodSpec>,
}

#[derive(Debug, Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Debug, Deserialize)]
struct Container {
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentStatus {
    #[serde(default)]
    ready_replicas: Option<u32>,
}

/// Decode `kubectl get deployments -o json` output.
///
/// `spec.replicas` defaults to 1 and `status.readyReplicas` to 0, matching
/// the API server's omission rules.
pub fn parse_deployment_list(raw: &[u8], namespace: &str) -> ClusterResult<Vec<Deployment>> {
    let list: DeploymentList = serde_json::from_slice(raw)?;
    Ok(list
        .items
        .into_iter()
        .map(|item| {
            let image = item
                .spec
                .template
                .and_then(|t| t.spec)
                .and_then(|s| s.containers.into_iter().next())
                .and_then(|c| c.image);
            Deployment {
                name: item.metadata.name,
                namespace: item
                    .metadata
                    .namespace
                    .unwrap_or_else(|| namespace.to_string()),
                ready_replicas: item.status.ready_replicas.unwrap_or(0),
                desired_replicas: item.spec.replicas.unwrap_or(1),
                created_at: item.metadata.creation_timestamp,
                image,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedExecutor, ScriptedResponse};

    const LIST_JSON: &str = r#"{
        "apiVersion": "v1",
        "kind": "List",
        "items": [
            {
                "metadata": {
                    "name": "uecm-frontend",
                    "namespace": "miniudm",
                    "creationTimestamp": "2026-01-01T00:00:00Z"
                },
                "spec": {
                    "replicas": 2,
                    "template": {"spec": {"containers": [{"name": "app", "image": "registry/uecm:1.2"}]}}
                },
                "status": {"readyReplicas": 2}
            },
            {
                "metadata": {"name": "nim-backend"},
                "spec": {},
                "status": {}
            }
        ]
    }"#;

    #[test]
    fn test_parse_deployment_list() {
        let deployments = parse_deployment_list(LIST_JSON.as_bytes(), "miniudm").unwrap();
        assert_eq!(deployments.len(), 2);

        let uecm = &deployments[0];
        assert_eq!(uecm.name, "uecm-frontend");
        assert_eq!(uecm.ready_replicas, 2);
        assert_eq!(uecm.desired_replicas, 2);
        assert_eq!(uecm.image.as_deref(), Some("registry/uecm:1.2"));
        assert!(uecm.created_at.is_some());
        assert!(uecm.is_ready());

        let nim = &deployments[1];
        assert_eq!(nim.namespace, "miniudm");
        assert_eq!(nim.desired_replicas, 1);
        assert_eq!(nim.ready_replicas, 0);
        assert!(!nim.is_ready());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_deployment_list(b"not json", "ns").unwrap_err();
        assert!(matches!(err, ClusterError::Parse(_)));
    }

    #[tokio::test]
    async fn test_namespace_not_found_is_false() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond(
            "get namespace ghost",
            ScriptedResponse::failure(1, "Error from server (NotFound): namespaces \"ghost\" not found"),
        );
        let client = KubectlClient::new(executor.clone(), "kubectl", Duration::from_secs(5));

        assert!(!client.namespace_exists("ghost").await.unwrap());
        assert!(client.namespace_exists("default").await.unwrap());
        assert_eq!(
            executor.calls()[0],
            vec!["kubectl", "get", "namespace", "ghost", "-o", "name"]
        );
    }

    #[tokio::test]
    async fn test_namespace_query_failure_is_error() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond(
            "get namespace",
            ScriptedResponse::failure(1, "Unable to connect to the server"),
        );
        let client = KubectlClient::new(executor, "kubectl", Duration::from_secs(5));

        let err = client.namespace_exists("default").await.unwrap_err();
        assert!(matches!(err, ClusterError::Request { .. }));
    }

    #[tokio::test]
    async fn test_list_deployments_via_kubectl() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("get deployments", ScriptedResponse::stdout(LIST_JSON));
        let client = KubectlClient::new(executor, "kubectl", Duration::from_secs(5));

        let deployments = client.list_deployments("miniudm").await.unwrap();
        assert_eq!(deployments.len(), 2);
        assert_eq!(deployments[0].name, "uecm-frontend");
    }
}
