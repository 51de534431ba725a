//! # Batch Validation
//!
//! Closed-world validation of an upload body. The whole batch is rejected
//! on the first violation, with a field path pointing at it. A malformed
//! batch usually means a client bug, and failing closed keeps poisoned data
//! out while giving the operator a precise signal.
//!
//! Unknown fields are dropped silently (serde's default), matching the
//! ingest contract. Everything else is strict: type mismatches, non-finite
//! or out-of-range numbers, over-length strings, over-cardinality arrays
//! and duplicate `miner_id`s all reject.

use shared_types::telemetry::{MAX_BOARDS, MAX_CHIP_TEMPS, MAX_FAN_SPEEDS, MAX_STRING_LEN};
use shared_types::{CoreError, TelemetryRecord};
use std::collections::HashSet;

/// Accepted physical ranges.
const TEMP_RANGE: (f64, f64) = (-273.0, 500.0);
const MAX_HASHRATE_GHS: f64 = 1.0e9;
const MAX_POWER_W: f64 = 1.0e7;
const MAX_FAN_RPM: u32 = 100_000;
const MAX_MINER_ID_LEN: usize = 128;

/// Parse and validate an upload body (a JSON array of telemetry records).
pub fn parse_and_validate(body: &[u8]) -> Result<Vec<TelemetryRecord>, CoreError> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_slice(body).map_err(|err| CoreError::Validation {
            field: "records".into(),
            detail: format!("body is not a JSON array of records: {err}"),
        })?;

    let mut records = Vec::with_capacity(raw.len());
    for (index, value) in raw.into_iter().enumerate() {
        let record: TelemetryRecord =
            serde_json::from_value(value).map_err(|err| CoreError::Validation {
                field: format!("records[{index}]"),
                detail: err.to_string(),
            })?;
        validate_record(index, &record)?;
        records.push(record);
    }

    // Duplicate miner ids within one batch reject the whole batch.
    let mut seen = HashSet::new();
    for (index, record) in records.iter().enumerate() {
        if !seen.insert(record.miner_id.as_str().to_string()) {
            return Err(CoreError::Validation {
                field: format!("records[{index}].miner_id"),
                detail: format!("duplicate miner_id {}", record.miner_id),
            });
        }
    }

    Ok(records)
}

fn validate_record(index: usize, record: &TelemetryRecord) -> Result<(), CoreError> {
    let field = |name: &str| format!("records[{index}].{name}");
    let fail = |name: &str, detail: String| {
        Err(CoreError::Validation { field: field(name), detail })
    };

    if record.miner_id.as_str().is_empty() {
        return fail("miner_id", "must not be empty".into());
    }
    if record.miner_id.as_str().len() > MAX_MINER_ID_LEN {
        return fail("miner_id", format!("longer than {MAX_MINER_ID_LEN} bytes"));
    }

    if record.temperature_chips.len() > MAX_CHIP_TEMPS {
        return fail(
            "temperature_chips",
            format!("{} entries, max {MAX_CHIP_TEMPS}", record.temperature_chips.len()),
        );
    }
    if record.fan_speeds.len() > MAX_FAN_SPEEDS {
        return fail(
            "fan_speeds",
            format!("{} entries, max {MAX_FAN_SPEEDS}", record.fan_speeds.len()),
        );
    }
    if record.boards.len() > MAX_BOARDS {
        return fail("boards", format!("{} entries, max {MAX_BOARDS}", record.boards.len()));
    }

    for (name, value) in [
        ("temperature_avg", record.temperature_avg),
        ("temperature_min", record.temperature_min),
        ("temperature_max", record.temperature_max),
    ] {
        if let Some(t) = value {
            if !t.is_finite() || t < TEMP_RANGE.0 || t > TEMP_RANGE.1 {
                return fail(name, format!("{t} outside {:?}", TEMP_RANGE));
            }
        }
    }
    for (i, t) in record.temperature_chips.iter().enumerate() {
        if !t.is_finite() || *t < TEMP_RANGE.0 || *t > TEMP_RANGE.1 {
            return fail(&format!("temperature_chips[{i}]"), format!("{t} outside {:?}", TEMP_RANGE));
        }
    }

    if let Some(rate) = record.hashrate_ghs {
        if !rate.is_finite() || !(0.0..=MAX_HASHRATE_GHS).contains(&rate) {
            return fail("hashrate_ghs", format!("{rate} outside 0..={MAX_HASHRATE_GHS}"));
        }
    }
    if let Some(freq) = record.frequency_avg {
        if !freq.is_finite() || freq < 0.0 {
            return fail("frequency_avg", format!("{freq} must be non-negative"));
        }
    }
    if let Some(power) = record.power_consumption {
        if !power.is_finite() || !(0.0..=MAX_POWER_W).contains(&power) {
            return fail("power_consumption", format!("{power} outside 0..={MAX_POWER_W}"));
        }
    }
    for (i, rpm) in record.fan_speeds.iter().enumerate() {
        if *rpm > MAX_FAN_RPM {
            return fail(&format!("fan_speeds[{i}]"), format!("{rpm} rpm exceeds {MAX_FAN_RPM}"));
        }
    }

    for (name, value) in [
        ("pool_url", &record.pool_url),
        ("worker_name", &record.worker_name),
        ("model", &record.model),
        ("firmware_version", &record.firmware_version),
        ("error_message", &record.error_message),
    ] {
        if let Some(s) = value {
            if s.len() > MAX_STRING_LEN {
                return fail(name, format!("{} bytes, max {MAX_STRING_LEN}", s.len()));
            }
        }
    }

    for (i, board) in record.boards.iter().enumerate() {
        if let Some(t) = board.temperature {
            if !t.is_finite() || t < TEMP_RANGE.0 || t > TEMP_RANGE.1 {
                return fail(&format!("boards[{i}].temperature"), format!("{t} outside {:?}", TEMP_RANGE));
            }
        }
        if let Some(rate) = board.hashrate_ghs {
            if !rate.is_finite() || !(0.0..=MAX_HASHRATE_GHS).contains(&rate) {
                return fail(
                    &format!("boards[{i}].hashrate_ghs"),
                    format!("{rate} outside 0..={MAX_HASHRATE_GHS}"),
                );
            }
        }
    }

    Ok(())
}
