/// Kubernetes objects and API access
pub mod catalog;
pub mod client;
pub mod nodes;
pub mod objects;
pub mod paths;

pub use client::{KubeApi, KubeClient};
pub use objects::KubernetesObject;
