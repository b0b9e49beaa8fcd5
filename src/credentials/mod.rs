/// Kubeconfig credential extraction and persistence
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};

pub const CA_FILE: &str = "ca.pem";
pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";
pub const ENV_FILE: &str = "cluster.env";

const CLUSTER_ID_VAR: &str = "DO_CLUSTER_ID";
const CLUSTER_URL_VAR: &str = "DO_CLUSTER_URL";

/// Subset of the kubeconfig document needed for mutual TLS
#[derive(Debug, Deserialize)]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    cluster: Option<ClusterEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    certificate_authority_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    user: Option<UserEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    client_certificate_data: Option<String>,
    client_key_data: Option<String>,
}

/// PEM material for authenticating against the Kubernetes API
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub ca_cert: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("ca_cert", &format_args!("{} bytes", self.ca_cert.len()))
            .field("client_cert", &format_args!("{} bytes", self.client_cert.len()))
            .field("client_key", &"<redacted>")
            .finish()
    }
}

fn decode_field(value: Option<&String>, path: &str) -> Result<Vec<u8>> {
    let encoded = value.ok_or_else(|| Error::malformed_credentials(format!("missing {}", path)))?;
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::malformed_credentials(format!("invalid base64 in {}: {}", path, e)))
}

impl CredentialBundle {
    /// Parse a kubeconfig document and decode its embedded certificates
    ///
    /// Uses the first cluster and the first user entry. Nothing is returned
    /// unless all three payloads decode.
    pub fn extract(kubeconfig: &str) -> Result<Self> {
        let config: Kubeconfig = serde_yaml::from_str(kubeconfig)
            .map_err(|e| Error::malformed_credentials(format!("unparseable kubeconfig: {}", e)))?;

        let cluster = config
            .clusters
            .first()
            .and_then(|c| c.cluster.as_ref())
            .ok_or_else(|| Error::malformed_credentials("missing clusters[0].cluster"))?;
        let user = config
            .users
            .first()
            .and_then(|u| u.user.as_ref())
            .ok_or_else(|| Error::malformed_credentials("missing users[0].user"))?;

        Ok(Self {
            ca_cert: decode_field(
                cluster.certificate_authority_data.as_ref(),
                "clusters[0].cluster.certificate-authority-data",
            )?,
            client_cert: decode_field(
                user.client_certificate_data.as_ref(),
                "users[0].user.client-certificate-data",
            )?,
            client_key: decode_field(
                user.client_key_data.as_ref(),
                "users[0].user.client-key-data",
            )?,
        })
    }

    /// Write `ca.pem`, `cert.pem` and `key.pem` into `dir`
    pub async fn write_to(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;

        tokio::fs::write(dir.join(CA_FILE), &self.ca_cert).await?;
        tokio::fs::write(dir.join(CERT_FILE), &self.client_cert).await?;

        let key_path = dir.join(KEY_FILE);
        tokio::fs::write(&key_path, &self.client_key).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        info!("Certificates and key saved to {}", dir.display());
        Ok(())
    }

    /// Read the PEM files written by [`CredentialBundle::write_to`]
    pub async fn load_from(dir: &Path) -> Result<Self> {
        Ok(Self {
            ca_cert: read_required(dir.join(CA_FILE)).await?,
            client_cert: read_required(dir.join(CERT_FILE)).await?,
            client_key: read_required(dir.join(KEY_FILE)).await?,
        })
    }
}

async fn read_required(path: PathBuf) -> Result<Vec<u8>> {
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::FileNotFound(path)),
        Err(e) => Err(e.into()),
    }
}

/// Cluster identity handed from the provisioning step to later sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterExport {
    pub id: String,
    pub endpoint: String,
}

impl ClusterExport {
    /// Pair a cluster ID with its API endpoint
    ///
    /// The provider leaves the endpoint empty until the control plane is
    /// reachable; such a cluster yields `NotReady`.
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(Error::NotReady(id));
        }
        Ok(Self { id, endpoint })
    }

    /// Shell-sourceable `export` lines
    pub fn render(&self) -> String {
        format!(
            "export {}={}\nexport {}={}\n",
            CLUSTER_ID_VAR, self.id, CLUSTER_URL_VAR, self.endpoint
        )
    }

    /// Parse the output of [`ClusterExport::render`]
    pub fn parse(content: &str) -> Result<Self> {
        let mut id = None;
        let mut endpoint = None;

        for line in content.lines() {
            let line = line.trim();
            let line = line.strip_prefix("export ").unwrap_or(line);
            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    CLUSTER_ID_VAR => id = Some(value.trim().to_string()),
                    CLUSTER_URL_VAR => endpoint = Some(value.trim().to_string()),
                    _ => {}
                }
            }
        }

        match (id, endpoint) {
            (Some(id), Some(endpoint)) => Self::new(id, endpoint),
            _ => Err(Error::configuration(format!(
                "env file must define {} and {}",
                CLUSTER_ID_VAR, CLUSTER_URL_VAR
            ))),
        }
    }

    /// Write `cluster.env` into `dir`
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(ENV_FILE);
        tokio::fs::write(&path, self.render()).await?;
        Ok(path)
    }

    /// Read `cluster.env` from `dir`
    pub async fn load_from(dir: &Path) -> Result<Self> {
        let bytes = read_required(dir.join(ENV_FILE)).await?;
        Self::parse(&String::from_utf8_lossy(&bytes))
    }
}
