/// Kubernetes REST client authenticated with client certificates
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::nodes::{NodeAddress, NodeList};
use super::objects::KubernetesObject;
use super::paths::{nodes_path, ObjectRef, CORE_VERSION};
use crate::credentials::CredentialBundle;
use crate::error::{Error, Result};

/// Object operations the deployment flow performs against a cluster
#[async_trait]
pub trait KubeApi: Send + Sync {
    /// POST the object to its kind collection; `Conflict` if the name is taken
    async fn create(&self, object: &KubernetesObject, namespace: &str) -> Result<Value>;

    /// DELETE the named object; `NotFound` if it is absent
    async fn delete(&self, object: &KubernetesObject, namespace: &str) -> Result<Value>;

    /// GET the object's status subresource, or the object for kinds without one
    async fn get_status(&self, object: &KubernetesObject, namespace: &str) -> Result<Value>;

    /// First pod address behind a service, `None` until one is assigned
    async fn resolve_service_address(&self, service: &str, namespace: &str)
        -> Result<Option<String>>;

    /// Every node with its external address, in listing order
    async fn list_nodes(&self) -> Result<Vec<NodeAddress>>;

    /// External addresses of all nodes, in listing order
    async fn external_ips(&self) -> Result<Vec<String>> {
        Ok(self
            .list_nodes()
            .await?
            .into_iter()
            .map(|n| n.external_ip)
            .collect())
    }
}

/// Endpoints document; only the address list matters here
#[derive(Debug, Default, Deserialize)]
struct Endpoints {
    #[serde(default)]
    subsets: Vec<EndpointSubset>,
}

#[derive(Debug, Deserialize)]
struct EndpointSubset {
    #[serde(default)]
    addresses: Vec<EndpointAddress>,
}

#[derive(Debug, Deserialize)]
struct EndpointAddress {
    ip: String,
}

impl Endpoints {
    fn first_address(self) -> Option<String> {
        self.subsets
            .into_iter()
            .next()
            .and_then(|s| s.addresses.into_iter().next())
            .map(|a| a.ip)
    }
}

/// Kubernetes API client
///
/// The TLS channel is configured once from the credential bundle; requests
/// carry no further authentication.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    base_url: Url,
}

impl KubeClient {
    /// Create a client for the API server at `endpoint`
    pub fn new(endpoint: &str, credentials: &CredentialBundle) -> Result<Self> {
        let base_url = Url::parse(endpoint).map_err(|e| {
            Error::configuration(format!("Invalid cluster URL {}: {}", endpoint, e))
        })?;

        let ca = reqwest::Certificate::from_pem(&credentials.ca_cert)?;
        let mut identity_pem = credentials.client_cert.clone();
        identity_pem.push(b'\n');
        identity_pem.extend_from_slice(&credentials.client_key);
        let identity = reqwest::Identity::from_pem(&identity_pem)?;

        let client = Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(ca)
            .identity(identity)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&KubernetesObject>,
    ) -> Result<(StatusCode, String)> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(object) = body {
            request = request.json(object);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }

    /// Issue a request concerning `object` and decode the JSON reply
    async fn object_request(
        &self,
        method: Method,
        target: &ObjectRef<'_>,
        path: &str,
        body: Option<&KubernetesObject>,
    ) -> Result<Value> {
        let (status, text) = self.request(method, path, body).await?;
        if status.is_success() {
            Ok(serde_json::from_str(&text)?)
        } else {
            Err(classify_failure(status, target, &text))
        }
    }
}

/// Map a failed response onto the error taxonomy
fn classify_failure(status: StatusCode, target: &ObjectRef<'_>, body: &str) -> Error {
    match status {
        StatusCode::CONFLICT => Error::Conflict {
            kind: target.kind.to_string(),
            name: target.name.to_string(),
        },
        StatusCode::NOT_FOUND => Error::NotFound {
            kind: target.kind.to_string(),
            name: target.name.to_string(),
        },
        _ => {
            // Failures come back as a Status object with a readable message
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| body.to_string());
            Error::Api {
                status: status.as_u16(),
                message,
            }
        }
    }
}

/// First ready address from an Endpoints response
///
/// The Endpoints object may lag behind its Service, so a 404 counts as no
/// address yet rather than a failure.
fn endpoint_address(
    status: StatusCode,
    target: &ObjectRef<'_>,
    body: &str,
) -> Result<Option<String>> {
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(classify_failure(status, target, body));
    }

    let endpoints: Endpoints = serde_json::from_str(body)?;
    Ok(endpoints.first_address())
}

#[async_trait]
impl KubeApi for KubeClient {
    async fn create(&self, object: &KubernetesObject, namespace: &str) -> Result<Value> {
        let target = ObjectRef::for_object(object, namespace);
        self.object_request(
            Method::POST,
            &target,
            &target.collection_path(),
            Some(object),
        )
        .await
    }

    async fn delete(&self, object: &KubernetesObject, namespace: &str) -> Result<Value> {
        let target = ObjectRef::for_object(object, namespace);
        self.object_request(Method::DELETE, &target, &target.path(), None)
            .await
    }

    async fn get_status(&self, object: &KubernetesObject, namespace: &str) -> Result<Value> {
        let target = ObjectRef::for_object(object, namespace);
        self.object_request(Method::GET, &target, &target.status_path(), None)
            .await
    }

    async fn resolve_service_address(
        &self,
        service: &str,
        namespace: &str,
    ) -> Result<Option<String>> {
        let target = ObjectRef::new("Endpoints", CORE_VERSION, namespace, service);
        let (status, text) = self.request(Method::GET, &target.path(), None).await?;
        endpoint_address(status, &target, &text)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeAddress>> {
        let (status, text) = self.request(Method::GET, &nodes_path(), None).await?;
        if !status.is_success() {
            let target = ObjectRef::new("Node", CORE_VERSION, "", "");
            return Err(classify_failure(status, &target, &text));
        }

        let nodes: NodeList = serde_json::from_str(&text)?;
        nodes.external_addresses()
    }
}
