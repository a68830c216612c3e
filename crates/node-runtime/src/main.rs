//! Relay-Mesh node entry point.
//!
//! Loads configuration, initializes telemetry, and runs the replication
//! service over the in-memory store until interrupted. Deployments backed
//! by a relational store swap the store construction here and nothing
//! else.

use anyhow::Context;
use node_runtime::{init_telemetry, NodeConfig, ReplicationService};
use relay_storage::MemoryEnvelopeStore;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("RELAY_CONFIG") {
        Ok(path) => NodeConfig::load(&path)
            .with_context(|| format!("loading config from {path}"))?,
        Err(_) => {
            let mut config = NodeConfig::default();
            // Local single-node default; real deployments must configure
            // their registered originator ID.
            config.node.node_id = 1;
            config
        }
    };

    init_telemetry(&config.telemetry).context("initializing telemetry")?;

    let store = Arc::new(MemoryEnvelopeStore::new());
    let service = ReplicationService::start(&config, store)
        .await
        .context("starting replication service")?;

    info!(
        originator_id = service.node_id(),
        "node up; waiting for shutdown signal"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("shutdown signal received");
    service.shutdown().await;

    Ok(())
}
