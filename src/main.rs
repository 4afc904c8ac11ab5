//! Controller entry point: load the server pool, connect to the cluster
//! and run the dispatcher until shutdown.

use anyhow::{Context as _, Result};
use clap::Parser;
use database_controller::controller::store::{KubeResourceStore, KubeSecretStore};
use database_controller::controller::{dispatcher, Context};
use database_controller::observability::metrics;
use database_controller::provisioner::ProvisionerRegistry;
use database_controller::server::{start_server, ServerState};
use database_controller::{config, BackendConfig};
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "database-controller", version, about)]
struct Args {
    /// Path to the YAML file listing backend servers
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    /// Number of worker loops; 1 serializes all provisioning operations
    #[arg(long, default_value_t = 1)]
    workers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "database_controller=info".into()),
        )
        .init();

    let args = Args::parse();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        build = env!("BUILD_DATETIME"),
        git = env!("BUILD_GIT_HASH"),
        "Starting Database Controller"
    );

    let backend_config: BackendConfig =
        config::load(&args.config).context("failed to read configuration")?;
    info!(
        mysql = backend_config.mysql.len(),
        postgresql = backend_config.postgresql.len(),
        "loaded backend server pools"
    );

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_port = std::env::var("METRICS_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    let probe_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, probe_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("failed to connect to the cluster")?;

    let ctx = Arc::new(Context {
        config: backend_config,
        registry: ProvisionerRegistry::with_defaults(),
        resources: Arc::new(KubeResourceStore::new(client.clone())),
        secrets: Arc::new(KubeSecretStore::new(client.clone())),
    });

    dispatcher::run(client, ctx, args.workers, server_state).await
}
