/// Managed Kubernetes provider API client implementation
pub mod client;
pub mod models;
pub mod readiness;

pub use client::{ClusterApi, ClusterClient};
pub use readiness::ReadinessPoller;
