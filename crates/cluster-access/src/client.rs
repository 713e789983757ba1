//! Cluster client abstraction.
//!
//! The collector only ever reads from the cluster: it asks whether a
//! namespace exists and lists the deployments inside it. Both calls are
//! point-in-time snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// Result type for cluster queries
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Point-in-time view of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    pub namespace: String,
    /// `status.readyReplicas`
    pub ready_replicas: u32,
    /// `spec.replicas`
    pub desired_replicas: u32,
    pub created_at: Option<DateTime<Utc>>,
    /// Image of the first container in the pod template.
    pub image: Option<String>,
}

impl Deployment {
    pub fn new(name: &str, namespace: &str, ready_replicas: u32, desired_replicas: u32) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ready_replicas,
            desired_replicas,
            created_at: None,
            image: None,
        }
    }

    /// Ready once every desired replica reports ready.
    pub fn is_ready(&self) -> bool {
        self.ready_replicas >= self.desired_replicas
    }
}

/// Read-only cluster API used by preflight validation and the CLI.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Whether the namespace exists.
    async fn namespace_exists(&self, namespace: &str) -> ClusterResult<bool>;

    /// All deployments in the namespace.
    async fn list_deployments(&self, namespace: &str) -> ClusterResult<Vec<Deployment>>;
}
