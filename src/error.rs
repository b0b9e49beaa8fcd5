/// Error types for cluster provisioning and workload deployment
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by the API clients, pollers and the orchestrator
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while provisioning a cluster or deploying workloads onto it
#[derive(Debug, Error)]
pub enum Error {
    /// A bounded polling loop ran out of time or attempts
    #[error("timed out after {attempts} attempts: {description}")]
    Timeout { description: String, attempts: u32 },

    /// A polling loop was aborted by an external signal
    #[error("cancelled while waiting: {0}")]
    Cancelled(String),

    /// The cluster exists but cannot serve the request yet
    #[error("cluster {0} is not ready")]
    NotReady(String),

    /// The provider reported the cluster in an error state
    #[error("cluster {0} entered the error state")]
    ClusterFailed(String),

    /// The kubeconfig document is missing a field or carries invalid base64
    #[error("malformed credentials: {0}")]
    MalformedCredentials(String),

    /// An object with the same name already exists on the server
    #[error("{kind} {name} already exists")]
    Conflict { kind: String, name: String },

    /// The named object does not exist on the server
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// A node reported no address of type ExternalIP
    #[error("node {0} has no external IP address")]
    NoExternalIp(String),

    /// A dependency of a workload never became reachable
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// A required local file is missing
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A remote API answered with a non-success status
    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    /// Transport level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON or YAML (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a credentials error with the given message
    pub fn malformed_credentials(msg: impl Into<String>) -> Self {
        Self::MalformedCredentials(msg.into())
    }

    /// Whether a create call failed only because the object is already present
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the target object was absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
