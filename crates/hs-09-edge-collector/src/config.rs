//! Edge agent configuration.
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `HS_SERVER_URL` | Ingest API base URL |
//! | `HS_COLLECTOR_KEY` | `hsc_…` site key |
//! | `HS_DEVICE_ID` | This device's registered id |
//! | `HS_DEVICE_SECRET` | Shared secret for command signature checks |
//! | `HS_MINERS` | Comma-separated `id=host:port` fleet list |
//!
//! Scheduling knobs (`EDGE_POLL_INTERVAL_S`, `EDGE_JITTER_S`,
//! `EDGE_WORKERS`) come from [`shared_types::config::CoreConfig`].

use shared_types::config::EdgeConfig;
use shared_types::MinerId;
use std::env;

/// One polled miner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerTarget {
    pub id: MinerId,
    /// `host:port`, port 4028 by convention.
    pub addr: String,
}

/// Full agent configuration.
#[derive(Debug, Clone)]
pub struct EdgeCollectorConfig {
    pub server_url: String,
    pub collector_key: String,
    pub device_id: String,
    pub device_secret: Vec<u8>,
    pub miners: Vec<MinerTarget>,
    pub schedule: EdgeConfig,
}

impl EdgeCollectorConfig {
    /// Read the agent configuration from the environment.
    ///
    /// Returns `None` (with the missing variable named) when a required
    /// credential is absent.
    pub fn from_env(schedule: EdgeConfig) -> Result<Self, String> {
        let required = |name: &str| env::var(name).map_err(|_| format!("{name} is required"));
        Ok(Self {
            server_url: required("HS_SERVER_URL")?,
            collector_key: required("HS_COLLECTOR_KEY")?,
            device_id: required("HS_DEVICE_ID")?,
            device_secret: required("HS_DEVICE_SECRET")?.into_bytes(),
            miners: parse_miners(&env::var("HS_MINERS").unwrap_or_default()),
            schedule,
        })
    }
}

/// Parse `id=host:port,id=host:port`. Entries without an `=` use the
/// address as the id, matching how small sites label miners by IP.
#[must_use]
pub fn parse_miners(raw: &str) -> Vec<MinerTarget> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((id, addr)) => MinerTarget {
                id: MinerId::from(id.trim()),
                addr: addr.trim().to_string(),
            },
            None => MinerTarget {
                id: MinerId::from(entry),
                addr: entry.to_string(),
            },
        })
        .collect()
}
