//! kubedbaas operator - provisions databases on external DBMS endpoints

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use kubedbaas_common::config::ConfigSource;
use kubedbaas_common::crd::crd_manifests;
use kubedbaas_common::kube_utils::ClusterClient;
use kubedbaas_common::telemetry::{init_telemetry, TelemetryConfig};
use kubedbaas_common::{DEFAULT_LEADER_ELECTION_ID, DEFAULT_LEASE_NAMESPACE};
use kubedbaas_operator::controller_runner::{KubeControllerManager, ManagerOptions};
use kubedbaas_operator::startup::{Bootstrap, KubeClassLookup};
use kubedbaas_pool::{ConnectionPool, ConnectionPoolConfig};

/// kubedbaas - Kubernetes operator managing databases on external DBMS endpoints
#[derive(Parser, Debug)]
#[command(name = "kubedbaas", version, about, long_about = None)]
struct Cli {
    /// Path to the operator configuration file
    ///
    /// When unset, config.yaml / config.yml are searched in the working
    /// directory and then in /var/kubedbaas.
    #[arg(long = "load-config", value_name = "PATH")]
    load_config: Option<PathBuf>,

    /// Only run the controller while holding the leader lease
    #[arg(long)]
    enable_leader_election: bool,

    /// Name of the Lease used for leader election
    #[arg(long, default_value = DEFAULT_LEADER_ELECTION_ID)]
    leader_election_id: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "KUBEDBAAS_LOG_JSON")]
    log_json: bool,

    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube and sqlx both go through rustls; it needs exactly one provider
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install rustls crypto provider: {:?}. \
             TLS connections to the API server and DBMS endpoints are impossible without it.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json: cli.log_json,
        filter: None,
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if cli.crd {
        let manifests =
            crd_manifests().map_err(|e| anyhow::anyhow!("Failed to serialize CRDs: {}", e))?;
        println!("{manifests}");
        return Ok(());
    }

    run_operator(cli).await
}

async fn run_operator(cli: Cli) -> anyhow::Result<()> {
    // The client is built on first use, after the configuration is loaded
    let client = Arc::new(ClusterClient::new());

    let options = ManagerOptions {
        leader_election: cli.enable_leader_election,
        leader_election_id: cli.leader_election_id,
        lease_namespace: std::env::var("POD_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_LEASE_NAMESPACE.to_string()),
        identity: std::env::var("POD_NAME")
            .unwrap_or_else(|_| format!("kubedbaas-{}", std::process::id())),
    };

    tracing::info!(
        leader_election = options.leader_election,
        lease = %options.leader_election_id,
        identity = %options.identity,
        "starting kubedbaas operator"
    );

    let mut bootstrap = Bootstrap::new(
        ConfigSource::from_flag(cli.load_config),
        Arc::new(KubeClassLookup::new(Arc::clone(&client))),
        Arc::new(ConnectionPool::new(ConnectionPoolConfig::default())),
        Arc::new(KubeControllerManager::new(client, options)),
    );

    if let Err(e) = bootstrap.run().await {
        tracing::error!(error = %e, phase = %bootstrap.phase(), "{}", e.fatal_message());
        std::process::exit(1);
    }

    tracing::info!("kubedbaas operator shutting down");
    Ok(())
}
