use kubesnap::client::Client;
use kubesnap::cluster::KubeCluster;
use kubesnap::config::{ClientConfig, ServiceConfig};
use kubesnap::metrics::Metrics;
use kubesnap::service::SnapshotService;
use kubesnap::storage::FsStorage;

use anyhow::Context;
use tokio::runtime::Runtime;

use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = ServiceConfig::from_env()?;
    let client_config = ClientConfig::discover(config.user_agent.as_str())
        .context("Failed to load Kubernetes client configuration")?;
    log::info!(
        "Using api server: {}, writing backups under: {}",
        client_config.api_server_endpoint,
        config.backup_root.display()
    );

    let metrics = Metrics::new();
    let client = Client::new(client_config, metrics.client_metrics()).context("Failed to create client")?;

    let runtime = Runtime::new().context("Failed to start tokio runtime")?;
    let cluster = KubeCluster::new(client, runtime.handle().clone());
    let port = config.server_port;
    let service = SnapshotService::new(config, metrics, Arc::new(cluster), Arc::new(FsStorage));

    runtime.block_on(kubesnap::server::start(port, Arc::new(service)))?;
    log::warn!("Server stopped, shutting down");
    Ok(())
}
