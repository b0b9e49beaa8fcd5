/// REST path resolution for Kubernetes objects
use std::borrow::Cow;

use super::objects::KubernetesObject;

pub const CORE_VERSION: &str = "v1";

/// Kinds whose collection segment is known, including the irregular plurals
const KIND_SEGMENTS: &[(&str, &str)] = &[
    ("ConfigMap", "configmaps"),
    ("Deployment", "deployments"),
    ("Endpoints", "endpoints"),
    ("Ingress", "ingresses"),
    ("NetworkPolicy", "networkpolicies"),
    ("Node", "nodes"),
    ("PersistentVolumeClaim", "persistentvolumeclaims"),
    ("Pod", "pods"),
    ("Secret", "secrets"),
    ("Service", "services"),
    ("StorageClass", "storageclasses"),
];

/// Kinds served without a `/status` subresource
const STATUSLESS_KINDS: &[&str] = &["ConfigMap", "Endpoints", "Secret"];

/// Collection segment for a kind
///
/// Kinds outside the table fall back to lower-case plus `s`, which is wrong
/// for irregular plurals.
pub fn kind_segment(kind: &str) -> Cow<'static, str> {
    KIND_SEGMENTS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, segment)| Cow::Borrowed(*segment))
        .unwrap_or_else(|| Cow::Owned(format!("{}s", kind.to_lowercase())))
}

/// `/api/v1` for the core group, `/apis/{group}/{version}` otherwise
pub fn api_root(api_version: &str) -> String {
    if api_version == CORE_VERSION {
        "/api/v1".to_string()
    } else {
        format!("/apis/{}", api_version)
    }
}

/// Identity of a namespaced object on the API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef<'a> {
    pub kind: &'a str,
    pub api_version: &'a str,
    pub namespace: &'a str,
    pub name: &'a str,
}

impl<'a> ObjectRef<'a> {
    pub fn new(kind: &'a str, api_version: &'a str, namespace: &'a str, name: &'a str) -> Self {
        Self {
            kind,
            api_version,
            namespace,
            name,
        }
    }

    pub fn for_object(object: &'a KubernetesObject, namespace: &'a str) -> Self {
        Self::new(object.kind(), object.api_version(), namespace, object.name())
    }

    /// Path of the kind collection objects are POSTed to
    pub fn collection_path(&self) -> String {
        format!(
            "{}/namespaces/{}/{}",
            api_root(self.api_version),
            self.namespace,
            kind_segment(self.kind)
        )
    }

    /// Path of this named object
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name)
    }

    /// Path of this object's status subresource
    ///
    /// Kinds without one are read from the object path itself.
    pub fn status_path(&self) -> String {
        if STATUSLESS_KINDS.contains(&self.kind) {
            self.path()
        } else {
            format!("{}/status", self.path())
        }
    }
}

/// Path of the cluster-scoped node list
pub fn nodes_path() -> String {
    format!("{}/{}", api_root(CORE_VERSION), kind_segment("Node"))
}
