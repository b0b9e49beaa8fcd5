/// Dependency-ordered deployment of the NFS, SSH and web workloads
use futures::try_join;
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::k8s::catalog::{self, *};
use crate::k8s::{KubeApi, KubernetesObject};
use crate::utils::polling::PollingConfig;

/// Resolved settings for one deployment run
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub namespace: String,
    pub ssh_public_key: PathBuf,
    pub storage_class: String,
    pub pvc_size: String,
    pub debug_pod: bool,
}

/// Result of submitting one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Where the deployed workloads can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentReport {
    pub nfs_ip: String,
    pub node_ips: Vec<String>,
    pub ssh_port: u16,
    pub web_url: String,
}

impl std::fmt::Display for DeploymentReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "nfs running in cluster on {}", self.nfs_ip)?;
        writeln!(
            f,
            "ssh accessible on port {} on IPs {}",
            self.ssh_port,
            self.node_ips.join(", ")
        )?;
        write!(f, "web server accessible at {}", self.web_url)
    }
}

/// Drives catalog objects through the Kubernetes API in dependency order
pub struct DeploymentOrchestrator<'a, K: KubeApi + ?Sized> {
    api: &'a K,
    settings: DeploySettings,
    nfs_polling: PollingConfig,
}

impl<'a, K: KubeApi + ?Sized> DeploymentOrchestrator<'a, K> {
    pub fn new(api: &'a K, settings: DeploySettings, nfs_polling: PollingConfig) -> Self {
        Self {
            api,
            settings,
            nfs_polling,
        }
    }

    fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    /// Create an object, treating an existing one as already satisfied
    pub async fn ensure(&self, object: &KubernetesObject) -> Result<CreateOutcome> {
        match self.api.create(object, self.namespace()).await {
            Ok(_) => {
                info!("Created {}", object);
                Ok(CreateOutcome::Created)
            }
            Err(e) if e.is_conflict() => {
                info!("{} already exists, keeping it", object);
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_all(&self, objects: &[KubernetesObject]) -> Result<()> {
        for object in objects {
            self.ensure(object).await?;
        }
        Ok(())
    }

    /// Step 1: storage claim, NFS server and its headless service
    pub async fn deploy_nfs(&self) -> Result<()> {
        info!("Deploying NFS server...");
        self.ensure_all(&self.nfs_objects()).await
    }

    /// Step 2: wait until the headless service lists the NFS pod address
    pub async fn wait_for_nfs(&self, cancel: &CancellationToken) -> Result<String> {
        let api = self.api;
        let namespace = self.namespace();

        self.nfs_polling
            .poll(cancel, move || async move {
                api.resolve_service_address(NFS_SERVICE, namespace).await
            })
            .await
            .map_err(|e| match e {
                Error::Timeout {
                    description,
                    attempts,
                } => Error::DependencyUnavailable(format!(
                    "{} has no endpoint address after {} attempts ({})",
                    NFS_SERVICE, attempts, description
                )),
                other => other,
            })
    }

    /// Step 3: public key secret, SSH jump box and its node port
    pub async fn deploy_ssh(&self, key_secret: &KubernetesObject, nfs_ip: &str) -> Result<()> {
        info!("Deploying SSH jump box...");
        self.ensure(key_secret).await?;
        self.ensure_all(&[ssh_server(nfs_ip), ssh_service(self.namespace())])
            .await
    }

    /// Step 4: web server and its node port
    pub async fn deploy_web(&self, nfs_ip: &str) -> Result<()> {
        info!("Deploying web server...");
        self.ensure_all(&[web_server(nfs_ip), web_service(self.namespace())])
            .await
    }

    /// Run all steps and report how to reach the workloads
    ///
    /// Safe to re-run against a partially deployed cluster.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<DeploymentReport> {
        // Read the key up front so a missing file aborts before anything is created
        let key_secret = catalog::ssh_pubkey_secret(&self.settings.ssh_public_key)?;

        self.deploy_nfs().await?;
        let nfs_ip = self.wait_for_nfs(cancel).await?;
        info!("nfs running in cluster on {}", nfs_ip);

        try_join!(
            self.deploy_ssh(&key_secret, &nfs_ip),
            self.deploy_web(&nfs_ip)
        )?;

        if self.settings.debug_pod {
            info!("Deploying debug pod...");
            self.ensure(&debug_server(&nfs_ip)).await?;
        }

        let node_ips = self.api.external_ips().await?;
        let first_ip = node_ips
            .first()
            .ok_or_else(|| Error::DependencyUnavailable("cluster has no nodes".to_string()))?;
        let web_url = format!("http://{}:{}", first_ip, WEB_EXPORT);

        Ok(DeploymentReport {
            nfs_ip,
            node_ips,
            ssh_port: SSHD_EXPORT,
            web_url,
        })
    }

    fn nfs_objects(&self) -> Vec<KubernetesObject> {
        vec![
            pvc(NFS_PVC, &self.settings.pvc_size, &self.settings.storage_class),
            nfs_server(NFS_DEPLOYMENT, NFS_PVC, NFS_ROLE),
            nfs_service(NFS_ROLE, self.namespace()),
        ]
    }

    /// Every workload object in creation order
    ///
    /// Only names and kinds are meaningful; the NFS host and key are blank.
    pub fn workload_objects(&self) -> Vec<KubernetesObject> {
        let mut objects = self.nfs_objects();
        objects.extend([
            ssh_pubkey_secret_from_key(b""),
            ssh_server(""),
            ssh_service(self.namespace()),
            web_server(""),
            web_service(self.namespace()),
            debug_server(""),
        ]);
        objects
    }

    /// Delete every workload object, dependents first
    pub async fn teardown(&self) -> Result<()> {
        for object in self.workload_objects().iter().rev() {
            match self.api.delete(object, self.namespace()).await {
                Ok(_) => info!("Deleted {}", object),
                Err(e) if e.is_not_found() => info!("{} not found, nothing to delete", object),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Server-side status of every workload object that exists
    pub async fn inspect(&self) -> Result<Vec<(String, Value)>> {
        let mut statuses = Vec::new();
        for object in self.workload_objects() {
            match self.api.get_status(&object, self.namespace()).await {
                Ok(status) => statuses.push((object.to_string(), status)),
                Err(e) if e.is_not_found() => warn!("{} is not deployed", object),
                Err(e) => return Err(e),
            }
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::nodes::NodeAddress;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory API server with conflict detection
    struct FakeCluster {
        objects: Mutex<BTreeMap<(String, String), Value>>,
        created: Mutex<Vec<String>>,
        endpoint_polls: Mutex<VecDeque<Option<String>>>,
        nodes: Vec<NodeAddress>,
    }

    impl FakeCluster {
        fn new(endpoint_polls: Vec<Option<&str>>, node_ips: &[&str]) -> Self {
            Self {
                objects: Mutex::new(BTreeMap::new()),
                created: Mutex::new(Vec::new()),
                endpoint_polls: Mutex::new(
                    endpoint_polls
                        .into_iter()
                        .map(|ip| ip.map(str::to_string))
                        .collect(),
                ),
                nodes: node_ips
                    .iter()
                    .enumerate()
                    .map(|(i, ip)| NodeAddress {
                        node: format!("devpool-{}", i),
                        external_ip: ip.to_string(),
                    })
                    .collect(),
            }
        }

        fn key(object: &KubernetesObject) -> (String, String) {
            (object.kind().to_string(), object.name().to_string())
        }

        fn stored(&self, kind: &str, name: &str) -> Option<Value> {
            self.objects
                .lock()
                .unwrap()
                .get(&(kind.to_string(), name.to_string()))
                .cloned()
        }
    }

    #[async_trait]
    impl KubeApi for FakeCluster {
        async fn create(&self, object: &KubernetesObject, _namespace: &str) -> Result<Value> {
            let mut objects = self.objects.lock().unwrap();
            let key = Self::key(object);
            if objects.contains_key(&key) {
                return Err(Error::Conflict {
                    kind: key.0,
                    name: key.1,
                });
            }
            let document = serde_json::to_value(object)?;
            objects.insert(key, document.clone());
            self.created.lock().unwrap().push(object.to_string());
            Ok(document)
        }

        async fn delete(&self, object: &KubernetesObject, _namespace: &str) -> Result<Value> {
            let key = Self::key(object);
            self.objects
                .lock()
                .unwrap()
                .remove(&key)
                .ok_or(Error::NotFound {
                    kind: key.0,
                    name: key.1,
                })
        }

        async fn get_status(&self, object: &KubernetesObject, _namespace: &str) -> Result<Value> {
            let key = Self::key(object);
            self.stored(&key.0, &key.1).ok_or(Error::NotFound {
                kind: key.0,
                name: key.1,
            })
        }

        async fn resolve_service_address(
            &self,
            _service: &str,
            _namespace: &str,
        ) -> Result<Option<String>> {
            let mut polls = self.endpoint_polls.lock().unwrap();
            // The last scripted answer repeats
            Ok(if polls.len() > 1 {
                polls.pop_front().flatten()
            } else {
                polls.front().cloned().flatten()
            })
        }

        async fn list_nodes(&self) -> Result<Vec<NodeAddress>> {
            Ok(self.nodes.clone())
        }
    }

    fn settings(pubkey: PathBuf) -> DeploySettings {
        DeploySettings {
            namespace: "default".to_string(),
            ssh_public_key: pubkey,
            storage_class: "do-block-storage".to_string(),
            pvc_size: "1Gi".to_string(),
            debug_pod: false,
        }
    }

    fn nfs_polling() -> PollingConfig {
        PollingConfig::new(
            Duration::from_secs(30),
            Duration::from_secs(5),
            "Waiting for NFS server address",
        )
    }

    fn pubkey_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"ssh-rsa AAAAB3Nza dev@host\n").unwrap();
        file
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_deployment_waits_for_nfs_address() {
        let key = pubkey_file();
        let cluster = FakeCluster::new(
            vec![None, Some("10.0.0.5")],
            &["203.0.113.10", "203.0.113.11"],
        );
        let orchestrator =
            DeploymentOrchestrator::new(&cluster, settings(key.path().to_path_buf()), nfs_polling());

        let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.nfs_ip, "10.0.0.5");
        assert_eq!(report.node_ips, vec!["203.0.113.10", "203.0.113.11"]);
        assert_eq!(report.ssh_port, 30022);
        assert_eq!(report.web_url, "http://203.0.113.10:30080");

        let web = cluster.stored("Deployment", WEB_DEPLOYMENT).unwrap();
        assert_eq!(
            web["spec"]["template"]["spec"]["volumes"][0]["nfs"]["server"],
            "10.0.0.5"
        );
        let sshd = cluster.stored("Deployment", SSHD_DEPLOYMENT).unwrap();
        assert_eq!(
            sshd["spec"]["template"]["spec"]["volumes"][0]["nfs"]["server"],
            "10.0.0.5"
        );
        assert!(cluster.stored("Deployment", DEBUG_DEPLOYMENT).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_is_created_before_dependents() {
        let key = pubkey_file();
        let cluster = FakeCluster::new(vec![Some("10.0.0.5")], &["203.0.113.10"]);
        let orchestrator =
            DeploymentOrchestrator::new(&cluster, settings(key.path().to_path_buf()), nfs_polling());

        orchestrator.run(&CancellationToken::new()).await.unwrap();

        let created = cluster.created.lock().unwrap().clone();
        assert_eq!(
            &created[..3],
            &[
                "PersistentVolumeClaim/nfs-pvc",
                "Deployment/nfs",
                "Service/nfs-service"
            ]
        );
        assert_eq!(created.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_tolerates_existing_objects() {
        let key = pubkey_file();
        let cluster = FakeCluster::new(vec![Some("10.0.0.5")], &["203.0.113.10"]);
        let orchestrator =
            DeploymentOrchestrator::new(&cluster, settings(key.path().to_path_buf()), nfs_polling());

        orchestrator.run(&CancellationToken::new()).await.unwrap();
        let second = orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(second.nfs_ip, "10.0.0.5");
        assert_eq!(cluster.created.lock().unwrap().len(), 8);
        assert_eq!(
            orchestrator.ensure(&web_service("default")).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_nfs_never_ready() {
        let key = pubkey_file();
        let cluster = FakeCluster::new(vec![None], &["203.0.113.10"]);
        let orchestrator =
            DeploymentOrchestrator::new(&cluster, settings(key.path().to_path_buf()), nfs_polling());

        let err = orchestrator
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DependencyUnavailable(_)));
        assert!(cluster.stored("Deployment", WEB_DEPLOYMENT).is_none());
        assert!(cluster.stored("Secret", SSH_SECRET).is_none());
    }

    #[tokio::test]
    async fn test_missing_pubkey_aborts_before_deploying() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new(vec![Some("10.0.0.5")], &["203.0.113.10"]);
        let orchestrator = DeploymentOrchestrator::new(
            &cluster,
            settings(dir.path().join("id_rsa.pub")),
            nfs_polling(),
        );

        let err = orchestrator
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FileNotFound(_)));
        assert!(cluster.created.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_pod_optional() {
        let key = pubkey_file();
        let cluster = FakeCluster::new(vec![Some("10.0.0.5")], &["203.0.113.10"]);
        let mut deploy_settings = settings(key.path().to_path_buf());
        deploy_settings.debug_pod = true;
        let orchestrator = DeploymentOrchestrator::new(&cluster, deploy_settings, nfs_polling());

        orchestrator.run(&CancellationToken::new()).await.unwrap();

        let debug = cluster.stored("Deployment", DEBUG_DEPLOYMENT).unwrap();
        assert_eq!(
            debug["spec"]["template"]["spec"]["containers"][0]["command"],
            serde_json::json!(["sleep", "9999999"])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_removes_everything_and_is_repeatable() {
        let key = pubkey_file();
        let cluster = FakeCluster::new(vec![Some("10.0.0.5")], &["203.0.113.10"]);
        let orchestrator =
            DeploymentOrchestrator::new(&cluster, settings(key.path().to_path_buf()), nfs_polling());

        orchestrator.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(orchestrator.inspect().await.unwrap().len(), 8);

        orchestrator.teardown().await.unwrap();
        assert!(cluster.objects.lock().unwrap().is_empty());

        orchestrator.teardown().await.unwrap();
        assert!(orchestrator.inspect().await.unwrap().is_empty());
    }

    #[test]
    fn test_report_display() {
        let report = DeploymentReport {
            nfs_ip: "10.0.0.5".to_string(),
            node_ips: vec!["203.0.113.10".to_string(), "203.0.113.11".to_string()],
            ssh_port: 30022,
            web_url: "http://203.0.113.10:30080".to_string(),
        };
        let rendered = report.to_string();
        assert!(rendered.contains("ssh accessible on port 30022 on IPs 203.0.113.10, 203.0.113.11"));
        assert!(rendered.ends_with("web server accessible at http://203.0.113.10:30080"));
    }
}
