/// Cloud cluster-management API client
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::models::*;
use crate::error::{Error, Result};

/// Default base URL of the managed Kubernetes API
pub const DEFAULT_API_BASE: &str = "https://api.digitalocean.com/v2/kubernetes";

/// Operations the provisioning flow needs from the cluster provider
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Available Kubernetes versions, newest first
    async fn get_options(&self) -> Result<ClusterOptions>;

    /// Submit a cluster spec; provisioning continues asynchronously
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<ClusterStatus>;

    /// Current status of a cluster
    async fn get_cluster_status(&self, id: &str) -> Result<ClusterStatus>;

    /// Raw kubeconfig YAML; `NotReady` until the cluster is running
    async fn get_kubeconfig(&self, id: &str) -> Result<String>;
}

/// HTTP client for the provider's cluster API
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
    base_url: String,
}

impl ClusterClient {
    /// Create a new client authenticating with a bearer token
    pub fn new(base_url: impl Into<String>, api_token: &str) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", api_token))
                .map_err(|_| Error::configuration("Invalid API token format"))?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Make a GET request to the API
    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = self.url(endpoint);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        Self::handle_response(response).await
    }

    /// Make a POST request to the API
    async fn post<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<R> {
        let url = self.url(endpoint);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;
        Self::handle_response(response).await
    }

    /// Handle API response, checking for errors
    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(api_error(status, &error_text))
        }
    }
}

/// Build an `Api` error, preferring the provider's `{id, message}` body
fn api_error(status: StatusCode, body: &str) -> Error {
    let message = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(error_response) => format!("{} - {}", error_response.id, error_response.message),
        Err(_) => body.to_string(),
    };
    Error::Api {
        status: status.as_u16(),
        message,
    }
}

/// Interpret a kubeconfig response
///
/// The provider answers 404, 409 or 412 while the cluster is still coming up.
fn kubeconfig_result(status: StatusCode, cluster_id: &str, body: String) -> Result<String> {
    match status {
        s if s.is_success() => Ok(body),
        StatusCode::NOT_FOUND | StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            Err(Error::NotReady(cluster_id.to_string()))
        }
        _ => Err(api_error(status, &body)),
    }
}

#[async_trait]
impl ClusterApi for ClusterClient {
    async fn get_options(&self) -> Result<ClusterOptions> {
        let response: OptionsResponse = self.get("options").await?;
        Ok(response.options)
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<ClusterStatus> {
        let response: ClusterResponse = self.post("clusters", spec).await?;
        Ok(response.kubernetes_cluster)
    }

    async fn get_cluster_status(&self, id: &str) -> Result<ClusterStatus> {
        let response: ClusterResponse = self.get(&format!("clusters/{}", id)).await?;
        Ok(response.kubernetes_cluster)
    }

    async fn get_kubeconfig(&self, id: &str) -> Result<String> {
        let url = self.url(&format!("clusters/{}/kubeconfig", id));
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        kubeconfig_result(status, id, body)
    }
}
