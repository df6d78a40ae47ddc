//! Provider daemon.
//!
//! Runs the provider supervisor against in-process dev subsystems and an
//! in-memory orchestration backend until interrupted.

use std::sync::Arc;

use anyhow::Result;
use bidplane_provider::config::Config;
use bidplane_provider::dev::{DevSubsystems, FixedPricing};
use bidplane_provider::{Capacity, Node, NodeInventory, PlatformClient, Service, StatusClient};
use bidplane_reconcile::memory::MemoryCluster;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const GIB: u64 = 1 << 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        hostname = %config.cluster_public_hostname,
        bid_deposit = %config.bid_deposit,
        "Starting bidplane provider"
    );

    bidplane_reconcile::metrics::register_metrics();

    // Dev backend: one node, in-memory orchestration API
    let inventory = NodeInventory::new(vec![Node::new(
        "dev-node-0",
        Capacity {
            cpu_millis: 8_000,
            memory_bytes: 32 * GIB,
            storage_bytes: 500 * GIB,
        },
    )])
    .with_commit_levels(config.commit_levels);
    let client = Arc::new(PlatformClient::new(Arc::new(MemoryCluster::new()), inventory));
    let factory = DevSubsystems::new(config.clone(), client.clone());
    let pricing = Arc::new(FixedPricing::new(config.bid_deposit.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service = Service::new(shutdown_rx, &factory, client, pricing, config).await?;

    match service.status().await {
        Ok(status) => info!(
            nodes = status.cluster.inventory.nodes.len(),
            leases = status.cluster.leases,
            "Provider ready"
        ),
        Err(e) => warn!(error = %e, "Status unavailable"),
    }

    // Wait for shutdown signal
    let done = service.done();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = done.wait() => {
            warn!("Provider stopped on its own");
        }
    }

    shutdown_tx.send_replace(true);
    if let Err(e) = service.close().await {
        error!(error = %e, "Provider shutdown failed");
        return Err(e.into());
    }

    info!("Provider shutdown complete");
    Ok(())
}
