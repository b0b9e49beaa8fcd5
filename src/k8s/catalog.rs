/// Workload object catalog
///
/// Pure builders for the objects making up the NFS server, the SSH jump box
/// and the web server. Nothing here performs network I/O; the only file
/// access is reading the SSH public key for the secret.
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::BTreeMap;
use std::path::Path;

use super::objects::*;
use crate::error::{Error, Result};

pub const NFS_PORTS: [(&str, u16); 3] = [("nfs", 2049), ("mountd", 20048), ("rpcbind", 111)];
pub const NFS_ROLE: &str = "nfs-server";
pub const NFS_SERVICE: &str = "nfs-service";
pub const NFS_PVC: &str = "nfs-pvc";
pub const NFS_VOLUME: &str = "nfs-volume";
pub const NFS_DEPLOYMENT: &str = "nfs";

pub const WEB_SERVER_ROLE: &str = "web-server";
pub const WEB_SERVICE: &str = "web-service";
pub const WEB_DEPLOYMENT: &str = "nginx";
pub const WEB_EXPORT: u16 = 30080;

pub const SSHD_ROLE: &str = "sshd-server";
pub const SSHD_SERVICE: &str = "sshd-service";
pub const SSHD_DEPLOYMENT: &str = "sshd";
pub const SSHD_EXPORT: u16 = 30022;
pub const SSH_SECRET: &str = "sshkey";
pub const SSH_SECRET_KEY: &str = "authorizedkeys";

pub const DEBUG_ROLE: &str = "alpine-role";
pub const DEBUG_DEPLOYMENT: &str = "alpine";

fn labels<const N: usize>(pairs: [(&str, &str); N]) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// PersistentVolumeClaim with ReadWriteOnce access
pub fn pvc(name: &str, size: &str, storage_class: &str) -> KubernetesObject {
    KubernetesObject::PersistentVolumeClaim(PersistentVolumeClaim {
        metadata: ObjectMeta::named(name),
        spec: PersistentVolumeClaimSpec {
            access_modes: vec!["ReadWriteOnce".to_string()],
            resources: ResourceRequirements {
                requests: labels([("storage", size)]),
            },
            storage_class_name: Some(storage_class.to_string()),
        },
    })
}

/// Single-replica deployment whose selector matches on `role` only
///
/// Two deployments sharing a role label would select each other's pods.
pub fn deployment(
    name: &str,
    role: &str,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
) -> KubernetesObject {
    KubernetesObject::Deployment(Deployment {
        metadata: ObjectMeta::named(name),
        spec: DeploymentSpec {
            replicas: 1,
            selector: LabelSelector {
                match_labels: labels([("role", role)]),
            },
            template: PodTemplateSpec {
                metadata: ObjectMeta {
                    labels: labels([("app", name), ("role", role)]),
                    ..Default::default()
                },
                spec: PodSpec {
                    containers,
                    volumes,
                },
            },
        },
    })
}

/// Single-container deployment mounting `nfs_host:nfs_path` on `mount_point`
///
/// `nfs_host` must already be resolved; an empty host yields an object the
/// API server accepts but whose pods never start.
pub fn nfs_deployment(
    name: &str,
    role: &str,
    mut container: Container,
    nfs_host: &str,
    mount_point: &str,
    nfs_path: &str,
) -> KubernetesObject {
    container.volume_mounts = vec![VolumeMount {
        name: NFS_VOLUME.to_string(),
        mount_path: mount_point.to_string(),
    }];
    let volume = Volume {
        name: NFS_VOLUME.to_string(),
        source: VolumeSource::Nfs {
            server: nfs_host.to_string(),
            path: nfs_path.to_string(),
        },
    };
    deployment(name, role, vec![container], vec![volume])
}

/// NFS server deployment backed by the named claim
pub fn nfs_server(name: &str, claim: &str, role: &str) -> KubernetesObject {
    let container = Container {
        name: name.to_string(),
        image: "janeczku/nfs-ganesha:latest".to_string(),
        ports: NFS_PORTS
            .iter()
            .map(|(port_name, port)| ContainerPort {
                name: Some(port_name.to_string()),
                container_port: *port,
            })
            .collect(),
        volume_mounts: vec![VolumeMount {
            name: NFS_VOLUME.to_string(),
            mount_path: "/data/nfs".to_string(),
        }],
        security_context: Some(SecurityContext { privileged: true }),
        ..Default::default()
    };
    let volume = Volume {
        name: NFS_VOLUME.to_string(),
        source: VolumeSource::PersistentVolumeClaim {
            claim_name: claim.to_string(),
        },
    };
    deployment(name, role, vec![container], vec![volume])
}

/// nginx serving the NFS export as its document root
pub fn web_server(nfs_host: &str) -> KubernetesObject {
    let container = Container {
        name: WEB_DEPLOYMENT.to_string(),
        image: "nginx:latest".to_string(),
        ports: vec![ContainerPort {
            name: Some("web".to_string()),
            container_port: 80,
        }],
        ..Default::default()
    };
    nfs_deployment(
        WEB_DEPLOYMENT,
        WEB_SERVER_ROLE,
        container,
        nfs_host,
        "/usr/share/nginx/html",
        "/",
    )
}

/// SSH jump box authorised by the key held in the `sshkey` secret
pub fn ssh_server(nfs_host: &str) -> KubernetesObject {
    let container = Container {
        name: SSHD_DEPLOYMENT.to_string(),
        image: "kubernetesio/sshd-jumpserver".to_string(),
        ports: vec![ContainerPort {
            name: None,
            container_port: 22,
        }],
        env: vec![EnvVar {
            name: "PUBLIC_KEY".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: SecretKeySelector {
                    name: SSH_SECRET.to_string(),
                    key: SSH_SECRET_KEY.to_string(),
                },
            }),
        }],
        security_context: Some(SecurityContext { privileged: true }),
        ..Default::default()
    };
    nfs_deployment(
        SSHD_DEPLOYMENT,
        SSHD_ROLE,
        container,
        nfs_host,
        "/mnt/nfs",
        "/",
    )
}

/// Idle alpine pod with the NFS export mounted, for poking around
pub fn debug_server(nfs_host: &str) -> KubernetesObject {
    let container = Container {
        name: DEBUG_DEPLOYMENT.to_string(),
        image: "markeijsermans/debug:alpine".to_string(),
        command: vec!["sleep".to_string(), "9999999".to_string()],
        ..Default::default()
    };
    nfs_deployment(
        DEBUG_DEPLOYMENT,
        DEBUG_ROLE,
        container,
        nfs_host,
        "/mnt/nfs",
        "/",
    )
}

/// Opaque secret holding the base64-encoded public key at `pubkey_path`
pub fn ssh_pubkey_secret(pubkey_path: &Path) -> Result<KubernetesObject> {
    let key = std::fs::read(pubkey_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound(pubkey_path.to_path_buf()),
        _ => Error::Io(e),
    })?;
    Ok(ssh_pubkey_secret_from_key(&key))
}

/// Opaque secret holding the given public key
pub fn ssh_pubkey_secret_from_key(key: &[u8]) -> KubernetesObject {
    let mut data = BTreeMap::new();
    data.insert(SSH_SECRET_KEY.to_string(), STANDARD.encode(key));

    KubernetesObject::Secret(Secret {
        metadata: ObjectMeta::named(SSH_SECRET),
        secret_type: "Opaque".to_string(),
        data,
    })
}

fn service(name: &str, namespace: &str, spec: ServiceSpec) -> KubernetesObject {
    KubernetesObject::Service(Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec,
    })
}

/// NodePort service exposing `port` of pods labelled `role=match_role` on `node_port`
pub fn exposed_service(
    name: &str,
    match_role: &str,
    port_name: &str,
    port: u16,
    node_port: u16,
    namespace: &str,
) -> KubernetesObject {
    service(
        name,
        namespace,
        ServiceSpec {
            service_type: "NodePort".to_string(),
            cluster_ip: None,
            ports: vec![ServicePort {
                name: port_name.to_string(),
                port,
                node_port: Some(node_port),
            }],
            selector: labels([("role", match_role)]),
        },
    )
}

/// Headless service in front of the NFS server
///
/// With `clusterIP: None` the Endpoints object lists the pod address itself,
/// which is what dependent deployments mount.
pub fn nfs_service(match_role: &str, namespace: &str) -> KubernetesObject {
    service(
        NFS_SERVICE,
        namespace,
        ServiceSpec {
            service_type: "ClusterIP".to_string(),
            cluster_ip: Some("None".to_string()),
            ports: NFS_PORTS
                .iter()
                .map(|(port_name, port)| ServicePort {
                    name: port_name.to_string(),
                    port: *port,
                    node_port: None,
                })
                .collect(),
            selector: labels([("role", match_role)]),
        },
    )
}

pub fn web_service(namespace: &str) -> KubernetesObject {
    exposed_service(WEB_SERVICE, WEB_SERVER_ROLE, "http", 80, WEB_EXPORT, namespace)
}

pub fn ssh_service(namespace: &str) -> KubernetesObject {
    exposed_service(SSHD_SERVICE, SSHD_ROLE, "ssh", 22, SSHD_EXPORT, namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_pvc_document() {
        let doc = serde_json::to_value(pvc(NFS_PVC, "1Gi", "do-block-storage")).unwrap();
        assert_eq!(
            doc,
            json!({
                "apiVersion": "v1",
                "kind": "PersistentVolumeClaim",
                "metadata": {"name": "nfs-pvc"},
                "spec": {
                    "accessModes": ["ReadWriteOnce"],
                    "resources": {"requests": {"storage": "1Gi"}},
                    "storageClassName": "do-block-storage"
                }
            })
        );
    }

    #[test]
    fn test_deployment_selects_on_role() {
        let doc = serde_json::to_value(deployment("nginx", "web-server", vec![], vec![])).unwrap();
        assert_eq!(doc["apiVersion"], "apps/v1");
        assert_eq!(doc["spec"]["replicas"], 1);
        assert_eq!(
            doc["spec"]["selector"],
            json!({"matchLabels": {"role": "web-server"}})
        );
        assert_eq!(
            doc["spec"]["template"]["metadata"]["labels"],
            json!({"app": "nginx", "role": "web-server"})
        );
    }

    #[test]
    fn test_nfs_deployment_mounts_export() {
        let doc = serde_json::to_value(web_server("10.0.0.5")).unwrap();
        let pod = &doc["spec"]["template"]["spec"];
        assert_eq!(
            pod["volumes"],
            json!([{"name": "nfs-volume", "nfs": {"server": "10.0.0.5", "path": "/"}}])
        );
        assert_eq!(
            pod["containers"][0]["volumeMounts"],
            json!([{"name": "nfs-volume", "mountPath": "/usr/share/nginx/html"}])
        );
        assert_eq!(pod["containers"][0]["ports"][0]["containerPort"], 80);
    }

    #[test]
    fn test_nfs_server_uses_claim() {
        let doc = serde_json::to_value(nfs_server(NFS_DEPLOYMENT, NFS_PVC, NFS_ROLE)).unwrap();
        let pod = &doc["spec"]["template"]["spec"];
        assert_eq!(pod["volumes"][0]["persistentVolumeClaim"]["claimName"], "nfs-pvc");
        assert_eq!(pod["containers"][0]["securityContext"]["privileged"], true);
        assert_eq!(pod["containers"][0]["ports"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_ssh_server_reads_key_from_secret() {
        let doc = serde_json::to_value(ssh_server("10.0.0.5")).unwrap();
        let container = &doc["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(
            container["env"][0]["valueFrom"]["secretKeyRef"],
            json!({"name": "sshkey", "key": "authorizedkeys"})
        );
        assert_eq!(container["volumeMounts"][0]["mountPath"], "/mnt/nfs");
    }

    #[test]
    fn test_nfs_service_is_headless() {
        let doc = serde_json::to_value(nfs_service(NFS_ROLE, "default")).unwrap();
        assert_eq!(doc["spec"]["clusterIP"], "None");
        assert_eq!(doc["spec"]["type"], "ClusterIP");
        assert_eq!(doc["spec"]["selector"], json!({"role": "nfs-server"}));
        assert_eq!(doc["metadata"]["namespace"], "default");
    }

    #[test]
    fn test_exposed_service_node_port() {
        let doc = serde_json::to_value(web_service("default")).unwrap();
        assert_eq!(doc["spec"]["type"], "NodePort");
        assert_eq!(
            doc["spec"]["ports"],
            json!([{"name": "http", "port": 80, "nodePort": 30080}])
        );
        assert!(doc["spec"].get("clusterIP").is_none());
    }

    #[test]
    fn test_ssh_pubkey_secret_encodes_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"ssh-rsa AAAAB3Nza dev@host\n").unwrap();

        let secret = ssh_pubkey_secret(file.path()).unwrap();
        let doc = serde_json::to_value(&secret).unwrap();
        assert_eq!(doc["kind"], "Secret");
        assert_eq!(doc["type"], "Opaque");
        assert_eq!(
            doc["data"]["authorizedkeys"],
            STANDARD.encode(b"ssh-rsa AAAAB3Nza dev@host\n")
        );
    }

    #[test]
    fn test_ssh_pubkey_secret_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("id_rsa.pub");
        assert!(matches!(
            ssh_pubkey_secret(&missing),
            Err(Error::FileNotFound(path)) if path == missing
        ));
    }
}
