//! # HashSentry Telemetry
//!
//! Observability for the core pipeline:
//!
//! - **Metrics**: Prometheus counters/gauges/histograms for events, uploads,
//!   commands and caches (see [`metrics`]).
//! - **Health**: the `/health` report assembler with the SLO thresholds
//!   (see [`health`]).
//! - **Logging**: `tracing-subscriber` initialization for binaries.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HS_LOG` | `info` | Log level filter (tracing env-filter syntax) |

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod health;
pub mod metrics;

pub use health::{ComponentHealth, HealthReport, HealthSnapshot, HealthStatus, LatencyTracker};
pub use metrics::{gather_text, register_metrics, MetricsHandle};

use thiserror::Error;

/// Telemetry initialization errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to register metrics: {0}")]
    MetricsInit(String),
}

/// Initialize structured logging from `HS_LOG` (default `info`).
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("HS_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
