//! # hs-edge - The On-Prem Edge Collector
//!
//! Wires the polling loop, the uploader and the command runner from
//! environment configuration and runs until Ctrl+C.

use anyhow::{anyhow, Result};
use hs_09_edge_collector::{
    CgMinerClient, ClientConfig, CommandRunner, EdgeCollectorConfig, HttpIngestClient,
    MinerPoller, Uploader, EXEC_WHITELIST,
};
use shared_types::CoreConfig;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("HS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let core = CoreConfig::from_env();
    let config = EdgeCollectorConfig::from_env(core.edge.clone()).map_err(|err| anyhow!(err))?;

    info!(
        server = %config.server_url,
        device = %config.device_id,
        miners = config.miners.len(),
        "hs-edge starting"
    );

    let api = Arc::new(HttpIngestClient::new(
        config.server_url.clone(),
        config.collector_key.clone(),
        config.device_id.clone(),
    )?);
    let uploader = Arc::new(Uploader::new(api.clone()));

    let poller = Arc::new(MinerPoller::new(
        CgMinerClient::new(ClientConfig::default()),
        config.miners.clone(),
        config.schedule.clone(),
    ));
    let poller_handle = poller.start(uploader);

    let runner = Arc::new(CommandRunner::new(
        api,
        CgMinerClient::with_whitelist(ClientConfig::default(), EXEC_WHITELIST),
        &config.device_secret,
        &config.miners,
    ));
    let runner_handle = runner.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    poller_handle.shutdown().await;
    runner_handle.shutdown().await;
    Ok(())
}
