/// Cloud cluster API data models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Node pool requested for a new cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolSpec {
    pub name: String,
    /// Droplet size slug (e.g. "s-2vcpu-4gb")
    pub size: String,
    pub count: u32,
}

/// Cluster creation request, immutable once submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSpec {
    pub name: String,
    pub region: String,
    pub version: String,
    pub node_pools: Vec<NodePoolSpec>,
}

/// Provisioning state reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    Provisioning,
    Running,
    Degraded,
    Error,
    Deleting,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            ClusterState::Provisioning => "provisioning",
            ClusterState::Running => "running",
            ClusterState::Degraded => "degraded",
            ClusterState::Error => "error",
            ClusterState::Deleting => "deleting",
            ClusterState::Unknown => "unknown",
        };
        write!(f, "{}", state)
    }
}

/// Status block of a cluster resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBlock {
    pub state: ClusterState,
    #[serde(default)]
    pub message: Option<String>,
}

/// Cluster resource as returned by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub status: StatusBlock,
    /// Kubernetes API URL; empty until the control plane is up
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ClusterStatus {
    pub fn state(&self) -> ClusterState {
        self.status.state
    }

    pub fn is_running(&self) -> bool {
        self.status.state == ClusterState::Running
    }
}

/// Envelope used by every single-cluster response
#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterResponse {
    pub kubernetes_cluster: ClusterStatus,
}

/// Available Kubernetes version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionOption {
    pub slug: String,
    #[serde(default)]
    pub kubernetes_version: String,
}

/// Provisioning options offered by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterOptions {
    pub versions: Vec<VersionOption>,
}

/// Options response
#[derive(Debug, Serialize, Deserialize)]
pub struct OptionsResponse {
    pub options: ClusterOptions,
}

/// Error response from API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub id: String,
    pub message: String,
}
