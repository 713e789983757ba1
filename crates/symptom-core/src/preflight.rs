//! Preflight validation gate.
//!
//! Runs to completion before any task is spawned. Either every fragment
//! resolves to exactly one ready deployment, or the session fails and
//! nothing else happens.

use std::sync::Arc;

use cluster_access::ClusterClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::ValidationError;

/// Readiness of the deployment matched by one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReadiness {
    pub fragment: String,
    pub deployment: String,
    pub ready: u32,
    pub desired: u32,
}

/// Result of a successful validation, one entry per fragment in request
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub namespace: String,
    pub targets: Vec<DeploymentReadiness>,
}

/// Read-only checks against the cluster.
pub struct PreflightValidator {
    cluster: Arc<dyn ClusterClient>,
}

impl PreflightValidator {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }

    pub async fn validate(
        &self,
        namespace: &str,
        fragments: &[String],
    ) -> Result<PreflightReport, ValidationError> {
        if fragments.is_empty() {
            return Err(ValidationError::NoFragments);
        }

        if !self.cluster.namespace_exists(namespace).await? {
            return Err(ValidationError::NamespaceNotFound {
                namespace: namespace.to_string(),
            });
        }

        let deployments = self.cluster.list_deployments(namespace).await?;
        debug!(namespace = %namespace, count = deployments.len(), "deployments listed");

        let mut targets = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let matches: Vec<_> = deployments
                .iter()
                .filter(|d| d.name.contains(fragment.as_str()))
                .collect();

            let deployment = match matches.as_slice() {
                [] => {
                    return Err(ValidationError::DeploymentNotFound {
                        namespace: namespace.to_string(),
                        fragment: fragment.clone(),
                    })
                }
                [only] => *only,
                many => {
                    return Err(ValidationError::AmbiguousDeployment {
                        fragment: fragment.clone(),
                        matches: many.iter().map(|d| d.name.clone()).collect(),
                    })
                }
            };

            if !deployment.is_ready() {
                return Err(ValidationError::DeploymentNotReady {
                    deployment: deployment.name.clone(),
                    ready: deployment.ready_replicas,
                    desired: deployment.desired_replicas,
                });
            }

            info!(
                fragment = %fragment,
                deployment = %deployment.name,
                ready = deployment.ready_replicas,
                desired = deployment.desired_replicas,
                "deployment ready"
            );
            targets.push(DeploymentReadiness {
                fragment: fragment.clone(),
                deployment: deployment.name.clone(),
                ready: deployment.ready_replicas,
                desired: deployment.desired_replicas,
            });
        }

        Ok(PreflightReport {
            namespace: namespace.to_string(),
            targets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_access::fakes::MemoryCluster;

    fn fragments(list: &str) -> Vec<String> {
        list.split_whitespace().map(str::to_string).collect()
    }

    fn cluster() -> Arc<MemoryCluster> {
        Arc::new(
            MemoryCluster::new()
                .with_namespace("default")
                .with_deployment("miniudm", "uecm-deployment", 2, 2)
                .with_deployment("miniudm", "nim-deployment", 1, 1)
                .with_deployment("miniudm", "proxy-a", 1, 1)
                .with_deployment("miniudm", "proxy-b", 1, 1)
                .with_deployment("miniudm", "cache", 0, 3),
        )
    }

    #[tokio::test]
    async fn test_all_fragments_resolve_in_order() {
        let validator = PreflightValidator::new(cluster());
        let report = validator
            .validate("miniudm", &fragments("nim uecm"))
            .await
            .unwrap();

        let names: Vec<_> = report.targets.iter().map(|t| t.deployment.as_str()).collect();
        assert_eq!(names, vec!["nim-deployment", "uecm-deployment"]);
        assert_eq!(report.targets[1].ready, 2);
    }

    #[tokio::test]
    async fn test_default_namespace_without_uecm_fails() {
        let validator = PreflightValidator::new(cluster());
        let err = validator
            .validate("default", &fragments("uecm"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::DeploymentNotFound { ref fragment, .. } if fragment == "uecm"
        ));
    }

    #[tokio::test]
    async fn test_missing_namespace() {
        let validator = PreflightValidator::new(cluster());
        let err = validator.validate("nope", &fragments("uecm")).await.unwrap_err();
        assert!(matches!(err, ValidationError::NamespaceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_not_ready_and_ambiguous() {
        let validator = PreflightValidator::new(cluster());

        let err = validator.validate("miniudm", &fragments("cache")).await.unwrap_err();
        assert!(matches!(
            err,
            ValidationError::DeploymentNotReady { ready: 0, desired: 3, .. }
        ));

        let err = validator.validate("miniudm", &fragments("proxy")).await.unwrap_err();
        assert!(matches!(err, ValidationError::AmbiguousDeployment { .. }));
    }

    #[tokio::test]
    async fn test_empty_fragments_never_query_cluster() {
        let cluster = cluster();
        let validator = PreflightValidator::new(cluster.clone());
        let err = validator.validate("miniudm", &[]).await.unwrap_err();
        assert!(matches!(err, ValidationError::NoFragments));
        assert_eq!(cluster.query_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_is_validation_error() {
        let cluster = cluster();
        cluster.set_unreachable(true);
        let validator = PreflightValidator::new(cluster);
        let err = validator.validate("miniudm", &fragments("uecm")).await.unwrap_err();
        assert!(matches!(err, ValidationError::Cluster(_)));
    }
}
