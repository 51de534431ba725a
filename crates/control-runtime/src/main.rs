//! # hashsentry - Control Plane Runtime
//!
//! Builds the application (store, bus, publisher, consumers, command
//! queue, ingest API), serves HTTP, and runs until Ctrl+C.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HS_HTTP_ADDR` | `0.0.0.0:8080` | HTTP bind address |
//! | `HS_BOOTSTRAP_SITE` | unset | Provision a demo site at boot |

use anyhow::{Context, Result};
use control_runtime::{issue_collector_key, register_device, Application};
use hs_07_collector_ingest::StaticSessionAuth;
use shared_types::{CoreConfig, DeviceId, SiteId, TenantId};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    hs_telemetry::init_logging();

    info!("===========================================");
    info!("  HashSentry Control Plane v0.1.0");
    info!("===========================================");

    let config = CoreConfig::from_env();
    let app = Application::build(config, Arc::new(StaticSessionAuth::new()));

    // Optional first-boot provisioning for a fresh single-node install:
    // one site, one key (printed once), one edge device.
    if let Ok(site) = std::env::var("HS_BOOTSTRAP_SITE") {
        let tenant = TenantId::from(
            std::env::var("HS_BOOTSTRAP_TENANT").unwrap_or_else(|_| "default".into()),
        );
        let site = SiteId::from(site);
        let (key_id, token) = issue_collector_key(&app.store, &tenant, &site, "bootstrap")
            .context("issuing bootstrap collector key")?;
        let secret: [u8; 32] = rand::random();
        register_device(
            &app.store,
            &tenant,
            &site,
            &DeviceId::from(format!("edge-{site}").as_str()),
            "bootstrap device",
            secret.to_vec(),
            "bootstrap",
        )
        .context("registering bootstrap device")?;
        info!(site = %site, key_id = %key_id, "Bootstrap site provisioned");
        // The one and only time the plaintext exists outside the edge.
        println!("HS_COLLECTOR_KEY={token}");
        println!("HS_DEVICE_SECRET={}", hex::encode(secret));
    }

    let router = app.router();
    let addr = std::env::var("HS_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "HTTP listening");

    let running = app.start();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down gracefully...");
    server.abort();
    running.shutdown().await;
    Ok(())
}
