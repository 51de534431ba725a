//! # Telemetry Record
//!
//! The per-miner telemetry shape shared by the edge collector (producer),
//! the ingest API (validator/persister) and the live/history tables.
//!
//! Every field except `miner_id` is optional: the edge reports what the
//! hardware answered and leaves the rest null. The ingest server must
//! tolerate nulls; it must NOT tolerate out-of-range values or
//! over-cardinality arrays (see the limits below).

use crate::ids::MinerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap on chip temperature readings per record.
pub const MAX_CHIP_TEMPS: usize = 100;
/// Hard cap on fan speed readings per record.
pub const MAX_FAN_SPEEDS: usize = 20;
/// Hard cap on hash boards per record.
pub const MAX_BOARDS: usize = 10;
/// Hard cap on free-text fields (pool url, worker name, model, firmware,
/// error message).
pub const MAX_STRING_LEN: usize = 512;

/// Aggregate health classification for one miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
    Offline,
    Unknown,
}

impl Default for OverallHealth {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Per-board decomposition of a miner's stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardStats {
    /// Board index as reported by the firmware.
    pub index: u32,
    pub hashrate_ghs: Option<f64>,
    pub temperature: Option<f64>,
    pub chip_count: Option<u32>,
    /// Count of chips the firmware flags as faulty.
    pub failed_chips: Option<u32>,
}

/// One miner's telemetry snapshot as uploaded by the edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Miner identifier within the uploading site. Required; everything
    /// else is best-effort.
    pub miner_id: MinerId,
    /// Sample time at the edge. The server stores but never reorders.
    pub timestamp: Option<DateTime<Utc>>,

    pub online: Option<bool>,
    pub hashrate_ghs: Option<f64>,
    pub temperature_avg: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    #[serde(default)]
    pub temperature_chips: Vec<f64>,
    #[serde(default)]
    pub fan_speeds: Vec<u32>,
    pub frequency_avg: Option<f64>,
    pub accepted_shares: Option<u64>,
    pub rejected_shares: Option<u64>,
    pub hardware_errors: Option<u64>,
    pub uptime_seconds: Option<u64>,
    pub power_consumption: Option<f64>,
    pub pool_url: Option<String>,
    pub worker_name: Option<String>,
    pub pool_latency_ms: Option<u32>,
    #[serde(default)]
    pub boards: Vec<BoardStats>,
    pub boards_total: Option<u32>,
    pub boards_healthy: Option<u32>,
    #[serde(default)]
    pub overall_health: OverallHealth,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub error_message: Option<String>,
}

impl TelemetryRecord {
    /// A minimal offline record: the edge could not reach the miner at all.
    #[must_use]
    pub fn offline(miner_id: MinerId, error: impl Into<String>) -> Self {
        Self {
            miner_id,
            timestamp: Some(Utc::now()),
            online: Some(false),
            overall_health: OverallHealth::Offline,
            error_message: Some(error.into()),
            ..Self::default()
        }
    }

    /// Whether this record counts as online for upload accounting.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_record() {
        let rec = TelemetryRecord::offline(MinerId::from("M1"), "connection refused");
        assert!(!rec.is_online());
        assert_eq!(rec.overall_health, OverallHealth::Offline);
        assert_eq!(rec.error_message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_unknown_fields_dropped_on_deserialize() {
        // serde's default behavior: unknown fields are ignored, which is the
        // "drop silently" contract the ingest API documents.
        let json = serde_json::json!({
            "miner_id": "M1",
            "online": true,
            "hashrate_ghs": 13500.0,
            "some_future_field": 42
        });
        let rec: TelemetryRecord = serde_json::from_value(json).unwrap();
        assert!(rec.is_online());
        assert_eq!(rec.hashrate_ghs, Some(13500.0));
    }

    #[test]
    fn test_default_health_unknown() {
        let json = serde_json::json!({ "miner_id": "M1" });
        let rec: TelemetryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(rec.overall_health, OverallHealth::Unknown);
    }
}
