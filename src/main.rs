/// Kubestand - managed Kubernetes with NFS-backed workloads
///
/// Provisions a managed Kubernetes cluster, saves its client certificates, and
/// deploys an NFS server, an SSH jump box and a web server onto it through the
/// Kubernetes REST API.
mod cloud;
mod config;
mod credentials;
mod deploy;
mod error;
mod k8s;
mod utils;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cloud::{ClusterApi, ClusterClient, ReadinessPoller};
use crate::config::ProvisionConfig;
use crate::credentials::{ClusterExport, CredentialBundle};
use crate::deploy::DeploymentOrchestrator;
use crate::k8s::{KubeApi, KubeClient};

#[derive(Parser)]
#[command(name = "kubestand")]
#[command(about = "Provision a managed Kubernetes cluster and deploy NFS, SSH and web workloads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "cluster.yaml")]
    config: PathBuf,

    /// Directory holding the certificates and cluster.env
    #[arg(short, long, default_value = "./output")]
    output: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Kubernetes API server to talk to
#[derive(Args)]
struct ClusterTarget {
    /// Cluster API URL (falls back to cluster.env in the output directory)
    #[arg(long, env = "DO_CLUSTER_URL")]
    cluster_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate example configuration file
    Init,

    /// Create the cluster and save its credentials
    Create {
        /// Wait for an already submitted cluster instead of creating one
        #[arg(long)]
        resume: Option<String>,
    },

    /// Show cluster status
    Status {
        /// Cluster ID (falls back to cluster.env in the output directory)
        #[arg(long, env = "DO_CLUSTER_ID")]
        cluster_id: Option<String>,
    },

    /// Deploy the NFS, SSH and web workloads
    Deploy {
        #[command(flatten)]
        target: ClusterTarget,
    },

    /// List node external IPs
    Nodes {
        #[command(flatten)]
        target: ClusterTarget,
    },

    /// Show the server-side status of each workload object
    Inspect {
        #[command(flatten)]
        target: ClusterTarget,
    },

    /// Delete all workload objects
    Teardown {
        #[command(flatten)]
        target: ClusterTarget,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("kubestand={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Ctrl-C aborts any readiness wait in progress
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling...");
            on_signal.cancel();
        }
    });

    // Execute command
    let result = match &cli.command {
        Commands::Init => init_config(&cli).await,
        Commands::Create { resume } => create_cluster(&cli, resume.clone(), &cancel).await,
        Commands::Status { cluster_id } => show_status(&cli, cluster_id.clone()).await,
        Commands::Deploy { target } => deploy_workloads(&cli, target, &cancel).await,
        Commands::Nodes { target } => list_nodes(&cli, target).await,
        Commands::Inspect { target } => inspect_workloads(&cli, target).await,
        Commands::Teardown { target } => teardown_workloads(&cli, target).await,
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize example configuration file
async fn init_config(cli: &Cli) -> Result<()> {
    if cli.config.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            cli.config.display()
        );
    }

    let example_config = ProvisionConfig::example();
    let yaml = serde_yaml::to_string(&example_config)?;

    tokio::fs::write(&cli.config, yaml)
        .await
        .context("Failed to write configuration file")?;

    info!("Example configuration created: {}", cli.config.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the configuration file to match your requirements");
    info!("  2. Set your cloud API token:");
    info!("     export DO_TOKEN=your-token-here");
    info!("  3. Create the cluster:");
    info!("     kubestand create");

    Ok(())
}

fn cluster_client(config: &ProvisionConfig) -> Result<ClusterClient> {
    let token = config.api_token()?;
    Ok(ClusterClient::new(&config.api.base_url, &token)?)
}

/// Create a cluster, wait for it and save its credentials
async fn create_cluster(
    cli: &Cli,
    resume: Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    info!("Starting cluster creation...");

    let config = ProvisionConfig::from_file(&cli.config).context("Failed to load configuration")?;
    let client = cluster_client(&config)?;

    info!("Cluster name: {}", config.cluster.name);

    let cluster_id = match resume {
        Some(id) => {
            info!("Resuming wait for existing cluster {}", id);
            id
        }
        None => {
            let version = match &config.cluster.version {
                Some(version) => version.clone(),
                None => {
                    let options = client
                        .get_options()
                        .await
                        .context("Failed to fetch Kubernetes versions")?;
                    options
                        .versions
                        .first()
                        .map(|v| v.slug.clone())
                        .context("Provider offered no Kubernetes versions")?
                }
            };
            info!("Using version {}", version);

            let created = client
                .create_cluster(&config.cluster_spec(version))
                .await
                .context("Failed to create cluster")?;
            info!(
                "Cluster submitted (ID: {}, state: {})",
                created.id,
                created.state()
            );
            created.id
        }
    };

    let status = ReadinessPoller::new(config.cluster_polling())
        .wait_until_running(&client, &cluster_id, cancel)
        .await
        .with_context(|| format!("Cluster {} did not become ready", cluster_id))?;
    if let Some(created_at) = status.created_at {
        let elapsed = chrono::Utc::now().signed_duration_since(created_at);
        info!("Cluster running after {} minutes", elapsed.num_minutes());
    } else {
        info!("Cluster running");
    }

    let kubeconfig = client
        .get_kubeconfig(&status.id)
        .await
        .context("Failed to fetch kubeconfig")?;
    let bundle = CredentialBundle::extract(&kubeconfig)?;
    bundle
        .write_to(&cli.output)
        .await
        .context("Failed to save certificates")?;

    // The endpoint may only be published once credentials are available
    let current = client
        .get_cluster_status(&status.id)
        .await
        .context("Failed to refresh cluster info")?;
    let export = ClusterExport::new(current.id, current.endpoint)
        .with_context(|| format!("Cluster {} reported no API endpoint", status.id))?;
    let env_path = export
        .write_to(&cli.output)
        .await
        .context("Failed to write cluster env file")?;

    info!("✓ Cluster ready, endpoint, certs and keys saved");
    info!("");
    info!("Cluster details:");
    info!("  ID: {}", export.id);
    info!("  Endpoint: {}", export.endpoint);
    info!("");
    info!("To deploy workloads:");
    info!("  source {}", env_path.display());
    info!("  kubestand deploy");

    Ok(())
}

/// Show cluster status
async fn show_status(cli: &Cli, cluster_id: Option<String>) -> Result<()> {
    let config = ProvisionConfig::from_file(&cli.config).context("Failed to load configuration")?;
    let client = cluster_client(&config)?;

    let cluster_id = match cluster_id {
        Some(id) => id,
        None => ClusterExport::load_from(&cli.output)
            .await
            .context("No cluster ID given and no cluster.env found")?
            .id,
    };

    let status = client.get_cluster_status(&cluster_id).await?;

    info!("Cluster: {} (ID: {})", status.name, status.id);
    info!("  State: {}", status.state());
    if let Some(message) = &status.status.message {
        info!("  Message: {}", message);
    }
    info!(
        "  Endpoint: {}",
        if status.endpoint.is_empty() {
            "N/A"
        } else {
            status.endpoint.as_str()
        }
    );

    Ok(())
}

/// Build a Kubernetes client from the saved certificates
async fn kube_client(cli: &Cli, target: &ClusterTarget) -> Result<KubeClient> {
    let endpoint = match &target.cluster_url {
        Some(url) => url.clone(),
        None => {
            ClusterExport::load_from(&cli.output)
                .await
                .context("DO_CLUSTER_URL is not set and no cluster.env found")?
                .endpoint
        }
    };

    let bundle = CredentialBundle::load_from(&cli.output)
        .await
        .context("Credential files missing, run `kubestand create` first")?;

    Ok(KubeClient::new(&endpoint, &bundle)?)
}

/// Deploy all workloads in dependency order
async fn deploy_workloads(
    cli: &Cli,
    target: &ClusterTarget,
    cancel: &CancellationToken,
) -> Result<()> {
    info!("Deploying workloads...");

    let config = ProvisionConfig::from_file(&cli.config).context("Failed to load configuration")?;
    let settings = config.deploy_settings()?;
    let client = kube_client(cli, target).await?;

    let orchestrator = DeploymentOrchestrator::new(&client, settings, config.nfs_polling());
    let report = orchestrator.run(cancel).await?;

    info!("✓ Workloads deployed successfully!");
    info!("");
    for line in report.to_string().lines() {
        info!("  {}", line);
    }

    Ok(())
}

/// List node external IPs
async fn list_nodes(cli: &Cli, target: &ClusterTarget) -> Result<()> {
    let client = kube_client(cli, target).await?;
    let nodes = client.list_nodes().await?;

    info!("Nodes:");
    for node in nodes {
        info!("  - {} ({})", node.node, node.external_ip);
    }

    Ok(())
}

/// Print the status subresource of each deployed workload object
async fn inspect_workloads(cli: &Cli, target: &ClusterTarget) -> Result<()> {
    let config = ProvisionConfig::from_file(&cli.config).context("Failed to load configuration")?;
    let client = kube_client(cli, target).await?;

    let orchestrator =
        DeploymentOrchestrator::new(&client, config.deploy_settings()?, config.nfs_polling());
    for (object, status) in orchestrator.inspect().await? {
        info!("{}:", object);
        info!("{}", serde_json::to_string_pretty(&status)?);
    }

    Ok(())
}

/// Delete all workload objects
async fn teardown_workloads(cli: &Cli, target: &ClusterTarget) -> Result<()> {
    info!("Removing workloads...");

    let config = ProvisionConfig::from_file(&cli.config).context("Failed to load configuration")?;
    let client = kube_client(cli, target).await?;

    DeploymentOrchestrator::new(&client, config.deploy_settings()?, config.nfs_polling())
        .teardown()
        .await?;

    info!("✓ Workloads removed");

    Ok(())
}
