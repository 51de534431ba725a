//! # Response Normalization
//!
//! Merges the `summary`, `stats`, `pools` and `version` responses of one
//! miner into the upload record shape. CGMiner dialects disagree about
//! numbers-vs-strings and key names, so extraction is tolerant: a missing
//! or unreadable field stays `None`, never fails the record.

use chrono::Utc;
use serde_json::Value;
use shared_types::telemetry::{MAX_BOARDS, MAX_CHIP_TEMPS, MAX_FAN_SPEEDS};
use shared_types::{BoardStats, MinerId, OverallHealth, TelemetryRecord};

/// Read a number that may be encoded as a JSON number or a numeric string.
fn num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn get_num(obj: &Value, key: &str) -> Option<f64> {
    obj.get(key).and_then(num)
}

fn get_u64(obj: &Value, key: &str) -> Option<u64> {
    get_num(obj, key).filter(|v| *v >= 0.0).map(|v| v as u64)
}

/// First element of a CGMiner section array (`SUMMARY`, `POOLS`, ...).
fn section<'v>(response: Option<&'v Value>, name: &str) -> Option<&'v Value> {
    response?.get(name)?.as_array()?.first()
}

/// The stats body: the interesting object is the one after the header
/// entry, but some firmwares flatten it into a single object.
fn stats_body(response: Option<&Value>) -> Option<&Value> {
    let arr = response?.get("STATS")?.as_array()?;
    arr.iter().find(|entry| {
        entry.get("temp1").is_some()
            || entry.get("fan1").is_some()
            || entry.get("chain_rate1").is_some()
            || entry.get("frequency").is_some()
    })
}

/// Merge per-miner responses into one telemetry record.
#[must_use]
pub fn normalize_miner(
    miner_id: MinerId,
    summary: Option<&Value>,
    stats: Option<&Value>,
    pools: Option<&Value>,
    version: Option<&Value>,
) -> TelemetryRecord {
    let mut record = TelemetryRecord {
        miner_id,
        timestamp: Some(Utc::now()),
        online: Some(true),
        ..TelemetryRecord::default()
    };

    if let Some(sum) = section(summary, "SUMMARY") {
        record.hashrate_ghs = get_num(sum, "GHS 5s").or_else(|| get_num(sum, "GHS av"));
        record.accepted_shares = get_u64(sum, "Accepted");
        record.rejected_shares = get_u64(sum, "Rejected");
        record.hardware_errors = get_u64(sum, "Hardware Errors");
        record.uptime_seconds = get_u64(sum, "Elapsed");
    }

    if let Some(stats) = stats_body(stats) {
        record.frequency_avg = stats
            .get("frequency")
            .and_then(num)
            .or_else(|| get_num(stats, "frequency_avg"));

        // Board decomposition: chain_rateN / tempN / chain_acnN.
        let mut boards = Vec::new();
        let mut temps = Vec::new();
        for index in 1..=MAX_BOARDS as u32 {
            let rate = get_num(stats, &format!("chain_rate{index}"));
            let temp = get_num(stats, &format!("temp{index}"));
            let chips = get_num(stats, &format!("chain_acn{index}"));
            let failed = stats
                .get(format!("chain_acs{index}"))
                .and_then(Value::as_str)
                .map(|s| s.chars().filter(|c| *c == 'x').count() as u32);

            if rate.is_none() && temp.is_none() && chips.is_none() {
                continue;
            }
            if let Some(t) = temp.filter(|t| *t > 0.0) {
                temps.push(t);
            }
            boards.push(BoardStats {
                index,
                hashrate_ghs: rate,
                temperature: temp.filter(|t| *t > 0.0),
                chip_count: chips.map(|c| c as u32),
                failed_chips: failed,
            });
        }

        // Chip-level temperatures where the firmware exposes them.
        for index in 1..=MAX_CHIP_TEMPS as u32 {
            match get_num(stats, &format!("temp_chip{index}")) {
                Some(t) if t > 0.0 => record.temperature_chips.push(t),
                _ => {}
            }
        }

        if !temps.is_empty() {
            record.temperature_avg = Some(temps.iter().sum::<f64>() / temps.len() as f64);
            record.temperature_min = temps.iter().copied().fold(None, |acc: Option<f64>, t| {
                Some(acc.map_or(t, |a| a.min(t)))
            });
            record.temperature_max = temps.iter().copied().fold(None, |acc: Option<f64>, t| {
                Some(acc.map_or(t, |a| a.max(t)))
            });
        }

        for index in 1..=MAX_FAN_SPEEDS as u32 {
            match get_num(stats, &format!("fan{index}")) {
                Some(rpm) if rpm > 0.0 => record.fan_speeds.push(rpm as u32),
                _ => {}
            }
        }

        let healthy = boards
            .iter()
            .filter(|b| b.hashrate_ghs.is_some_and(|r| r > 0.0))
            .count() as u32;
        if !boards.is_empty() {
            record.boards_total = Some(boards.len() as u32);
            record.boards_healthy = Some(healthy);
        }
        record.boards = boards;
    }

    if let Some(pool) = section(pools, "POOLS") {
        record.pool_url = pool.get("URL").and_then(Value::as_str).map(str::to_string);
        record.worker_name = pool.get("User").and_then(Value::as_str).map(str::to_string);
        record.pool_latency_ms = get_num(pool, "Pool Latency").map(|v| v as u32);
    }

    if let Some(ver) = section(version, "VERSION") {
        record.model = ver
            .get("Type")
            .or_else(|| ver.get("Miner"))
            .and_then(Value::as_str)
            .map(str::to_string);
        record.firmware_version = ver
            .get("CompileTime")
            .or_else(|| ver.get("VERSION"))
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    record.overall_health = classify(&record);
    record
}

fn classify(record: &TelemetryRecord) -> OverallHealth {
    if record.online != Some(true) {
        return OverallHealth::Offline;
    }
    let Some(rate) = record.hashrate_ghs else {
        return OverallHealth::Unknown;
    };
    if rate <= 0.0 {
        return OverallHealth::Critical;
    }
    match (record.boards_total, record.boards_healthy) {
        (Some(_), Some(0)) => OverallHealth::Critical,
        (Some(total), Some(healthy)) if healthy < total => OverallHealth::Degraded,
        _ => OverallHealth::Healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn antminer_fixture() -> (Value, Value, Value, Value) {
        let summary = serde_json::json!({
            "SUMMARY": [{
                "GHS 5s": "13501.23",
                "GHS av": 13450.0,
                "Accepted": 91234,
                "Rejected": 120,
                "Hardware Errors": 34,
                "Elapsed": 86400
            }]
        });
        let stats = serde_json::json!({
            "STATS": [
                { "BMMiner": "2.0.0", "Miner": "S19" },
                {
                    "frequency": "650",
                    "temp1": 62.0, "temp2": 64.0, "temp3": 0.0,
                    "chain_rate1": "4500.1", "chain_rate2": "4480.9", "chain_rate3": "0",
                    "chain_acn1": 76, "chain_acn2": 76, "chain_acn3": 76,
                    "chain_acs3": "xxooooo",
                    "fan1": 5280, "fan2": 5160
                }
            ]
        });
        let pools = serde_json::json!({
            "POOLS": [{
                "URL": "stratum+tcp://pool.example:3333",
                "User": "acct.worker1",
                "Pool Latency": 42.5
            }]
        });
        let version = serde_json::json!({
            "VERSION": [{ "Type": "Antminer S19 Pro", "CompileTime": "2023-04-01" }]
        });
        (summary, stats, pools, version)
    }

    #[test]
    fn test_merges_all_sections() {
        let (summary, stats, pools, version) = antminer_fixture();
        let record = normalize_miner(
            MinerId::from("M1"),
            Some(&summary),
            Some(&stats),
            Some(&pools),
            Some(&version),
        );

        assert_eq!(record.hashrate_ghs, Some(13501.23));
        assert_eq!(record.accepted_shares, Some(91234));
        assert_eq!(record.uptime_seconds, Some(86400));
        assert_eq!(record.frequency_avg, Some(650.0));
        assert_eq!(record.fan_speeds, vec![5280, 5160]);
        assert_eq!(record.pool_url.as_deref(), Some("stratum+tcp://pool.example:3333"));
        assert_eq!(record.worker_name.as_deref(), Some("acct.worker1"));
        assert_eq!(record.pool_latency_ms, Some(42));
        assert_eq!(record.model.as_deref(), Some("Antminer S19 Pro"));

        // Three boards seen; the zero-rate board counts unhealthy.
        assert_eq!(record.boards_total, Some(3));
        assert_eq!(record.boards_healthy, Some(2));
        assert_eq!(record.boards[2].failed_chips, Some(2));
        assert_eq!(record.overall_health, OverallHealth::Degraded);

        // Zero temperatures are sensor gaps, not readings.
        assert_eq!(record.temperature_min, Some(62.0));
        assert_eq!(record.temperature_max, Some(64.0));
        assert_eq!(record.temperature_avg, Some(63.0));
    }

    #[test]
    fn test_missing_sections_stay_null() {
        let record = normalize_miner(MinerId::from("M1"), None, None, None, None);
        assert_eq!(record.hashrate_ghs, None);
        assert_eq!(record.pool_url, None);
        assert!(record.boards.is_empty());
        assert_eq!(record.overall_health, OverallHealth::Unknown);
    }

    #[test]
    fn test_numeric_strings_parse() {
        let summary = serde_json::json!({ "SUMMARY": [{ "GHS 5s": " 9100.5 " }] });
        let record =
            normalize_miner(MinerId::from("M1"), Some(&summary), None, None, None);
        assert_eq!(record.hashrate_ghs, Some(9100.5));
        assert_eq!(record.overall_health, OverallHealth::Healthy);
    }

    #[test]
    fn test_zero_hashrate_is_critical() {
        let summary = serde_json::json!({ "SUMMARY": [{ "GHS 5s": 0.0 }] });
        let record =
            normalize_miner(MinerId::from("M1"), Some(&summary), None, None, None);
        assert_eq!(record.overall_health, OverallHealth::Critical);
    }
}
