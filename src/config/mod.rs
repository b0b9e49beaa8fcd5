/// Configuration management for Kubestand
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cloud::client::DEFAULT_API_BASE;
use crate::cloud::models::{ClusterSpec, NodePoolSpec};
use crate::deploy::DeploySettings;
use crate::error::{Error, Result};
use crate::utils::polling::PollingConfig;

const TOKEN_ENV: &str = "DO_TOKEN";

/// Main provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Cluster to create
    pub cluster: ClusterSettings,

    /// Cloud API access
    #[serde(default)]
    pub api: ApiConfig,

    /// Readiness wait tuning
    #[serde(default)]
    pub polling: PollingSettings,

    /// Workload deployment settings
    #[serde(default)]
    pub workloads: WorkloadsConfig,
}

/// Cluster shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Cluster name
    pub name: String,

    /// Provider region slug
    #[serde(default = "default_region")]
    pub region: String,

    /// Kubernetes version slug; the newest offered version when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Worker node pools
    #[serde(default = "default_node_pools")]
    pub node_pools: Vec<NodePoolSpec>,
}

/// Cloud cluster API access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the managed Kubernetes API
    #[serde(default = "default_api_base")]
    pub base_url: String,

    /// API token (can also be set via DO_TOKEN env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Intervals and deadlines of the two readiness waits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_cluster_interval")]
    pub cluster_interval_secs: u64,

    #[serde(default = "default_cluster_timeout")]
    pub cluster_timeout_secs: u64,

    /// Optional cap on cluster status checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_max_attempts: Option<u32>,

    #[serde(default = "default_nfs_interval")]
    pub nfs_interval_secs: u64,

    #[serde(default = "default_nfs_timeout")]
    pub nfs_timeout_secs: u64,
}

/// Where and how workloads are deployed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadsConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Public key authorised on the SSH jump box (default ~/.ssh/id_rsa.pub)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<PathBuf>,

    #[serde(default = "default_storage_class")]
    pub storage_class: String,

    #[serde(default = "default_pvc_size")]
    pub pvc_size: String,

    /// Also deploy an idle alpine pod with the NFS export mounted
    #[serde(default)]
    pub debug_pod: bool,
}

fn default_region() -> String {
    "sfo2".to_string()
}

fn default_node_pools() -> Vec<NodePoolSpec> {
    vec![NodePoolSpec {
        name: "devpool".to_string(),
        size: "s-2vcpu-4gb".to_string(),
        count: 2,
    }]
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_cluster_interval() -> u64 {
    10
}

fn default_cluster_timeout() -> u64 {
    1800
}

fn default_nfs_interval() -> u64 {
    5
}

fn default_nfs_timeout() -> u64 {
    300
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_storage_class() -> String {
    "do-block-storage".to_string()
}

fn default_pvc_size() -> String {
    "1Gi".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            token: None,
        }
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            cluster_interval_secs: default_cluster_interval(),
            cluster_timeout_secs: default_cluster_timeout(),
            cluster_max_attempts: None,
            nfs_interval_secs: default_nfs_interval(),
            nfs_timeout_secs: default_nfs_timeout(),
        }
    }
}

impl Default for WorkloadsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            ssh_public_key: None,
            storage_class: default_storage_class(),
            pvc_size: default_pvc_size(),
            debug_pod: false,
        }
    }
}

impl ProvisionConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        let config: ProvisionConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cluster.name.is_empty() {
            return Err(Error::configuration("cluster.name cannot be empty"));
        }

        if self.cluster.region.is_empty() {
            return Err(Error::configuration("cluster.region cannot be empty"));
        }

        if self.cluster.node_pools.is_empty() {
            return Err(Error::configuration("at least one node pool is required"));
        }

        if let Some(pool) = self.cluster.node_pools.iter().find(|p| p.count == 0) {
            return Err(Error::configuration(format!(
                "node pool {} must have at least one node",
                pool.name
            )));
        }

        let polling = &self.polling;
        Self::validate_wait("cluster", polling.cluster_interval_secs, polling.cluster_timeout_secs)?;
        Self::validate_wait("nfs", polling.nfs_interval_secs, polling.nfs_timeout_secs)?;
        if polling.cluster_max_attempts == Some(0) {
            return Err(Error::configuration(
                "polling.cluster_max_attempts must be positive when set",
            ));
        }

        if self.workloads.namespace.is_empty() {
            return Err(Error::configuration("workloads.namespace cannot be empty"));
        }

        Ok(())
    }

    fn validate_wait(name: &str, interval_secs: u64, timeout_secs: u64) -> Result<()> {
        if interval_secs == 0 {
            return Err(Error::configuration(format!(
                "polling.{}_interval_secs must be positive",
                name
            )));
        }
        if interval_secs > timeout_secs {
            return Err(Error::configuration(format!(
                "polling.{}_interval_secs exceeds polling.{}_timeout_secs",
                name, name
            )));
        }
        Ok(())
    }

    /// Get the cloud API token from config or environment
    pub fn api_token(&self) -> Result<String> {
        self.api
            .token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV).ok())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::configuration(format!(
                    "Cloud API token not found. Set {} environment variable or specify api.token in config",
                    TOKEN_ENV
                ))
            })
    }

    /// Cluster creation request for the given version slug
    pub fn cluster_spec(&self, version: String) -> ClusterSpec {
        ClusterSpec {
            name: self.cluster.name.clone(),
            region: self.cluster.region.clone(),
            version,
            node_pools: self.cluster.node_pools.clone(),
        }
    }

    /// Polling policy for the cluster readiness wait
    pub fn cluster_polling(&self) -> PollingConfig {
        let polling = PollingConfig::new(
            Duration::from_secs(self.polling.cluster_timeout_secs),
            Duration::from_secs(self.polling.cluster_interval_secs),
            format!("Waiting for cluster {} to be running", self.cluster.name),
        );
        match self.polling.cluster_max_attempts {
            Some(max) => polling.with_max_attempts(max),
            None => polling,
        }
    }

    /// Polling policy for NFS address discovery
    pub fn nfs_polling(&self) -> PollingConfig {
        PollingConfig::new(
            Duration::from_secs(self.polling.nfs_timeout_secs),
            Duration::from_secs(self.polling.nfs_interval_secs),
            "Waiting for NFS server address",
        )
    }

    /// Deployment settings with the SSH key path resolved against $HOME
    pub fn deploy_settings(&self) -> Result<DeploySettings> {
        let ssh_public_key = match &self.workloads.ssh_public_key {
            Some(path) => path.clone(),
            None => {
                let home = std::env::var_os("HOME").ok_or_else(|| {
                    Error::configuration("HOME is not set; specify workloads.ssh_public_key")
                })?;
                PathBuf::from(home).join(".ssh").join("id_rsa.pub")
            }
        };

        Ok(DeploySettings {
            namespace: self.workloads.namespace.clone(),
            ssh_public_key,
            storage_class: self.workloads.storage_class.clone(),
            pvc_size: self.workloads.pvc_size.clone(),
            debug_pod: self.workloads.debug_pod,
        })
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        Self {
            cluster: ClusterSettings {
                name: "devkube".to_string(),
                region: default_region(),
                version: None,
                node_pools: default_node_pools(),
            },
            api: ApiConfig::default(),
            polling: PollingSettings::default(),
            workloads: WorkloadsConfig::default(),
        }
    }
}
