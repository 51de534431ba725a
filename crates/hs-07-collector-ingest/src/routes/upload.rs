//! `POST /collector/upload`.

use crate::error::ApiError;
use crate::rate_limit::RateDecision;
use crate::state::AppState;
use crate::validation::parse_and_validate;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use flate2::read::GzDecoder;
use hs_telemetry::metrics::{RECORDS_ACCEPTED, UPLOADS, UPLOAD_DURATION};
use serde::Serialize;
use shared_store::{
    append_event, Compression, StoreError, TelemetryHistoryRow, TelemetryLiveRow, UploadLogRow,
    UploadOutcome,
};
use shared_types::{CoreError, EventKind, TelemetryRecord};
use std::io::Read;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Success body.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub processed: usize,
    pub online: usize,
    pub offline: usize,
    pub processing_time_ms: u64,
}

/// Attach the `X-RateLimit-*` header triple to any response.
fn with_rate_headers(mut response: Response<axum::body::Body>, decision: &RateDecision) -> Response<axum::body::Body> {
    let headers = response.headers_mut();
    if let Ok(v) = decision.limit.to_string().parse() {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = decision.remaining.to_string().parse() {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = decision.reset_secs.to_string().parse() {
        headers.insert("X-RateLimit-Reset", v);
    }
    response
}

/// Best-effort client address for the upload log.
fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return real.to_string();
    }
    "unknown".to_string()
}

fn reject(reason: &str) {
    UPLOADS.with_label_values(&["rejected", reason]).inc();
}

/// The upload handler. Gates run in the documented order; the first failed
/// gate rejects the whole batch.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<axum::body::Body>, ApiError> {
    let started = Instant::now();

    let identity = state.authenticate_collector(&headers).map_err(|err| {
        reject("unauthorized");
        ApiError(err)
    })?;

    let decision = state.limiter.check(identity.key_id);
    if !decision.allowed {
        reject("rate_limited");
        let err = ApiError(CoreError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
        return Ok(with_rate_headers(err.into_response(), &decision));
    }

    let max_payload = state.config.max_payload_size;
    if body.len() as u64 > max_payload {
        reject("payload_too_large");
        return Err(ApiError(CoreError::PayloadTooLarge {
            detail: format!("{} bytes, cap {max_payload}", body.len()),
        }));
    }

    let is_gzip = headers
        .get("Content-Encoding")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    let compression = if is_gzip { Compression::Gzip } else { Compression::None };

    let decoded: Vec<u8> = if is_gzip {
        let mut decoder = GzDecoder::new(&body[..]).take(max_payload + 1);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf).map_err(|err| {
            reject("validation_failed");
            ApiError(CoreError::Validation {
                field: "body".into(),
                detail: format!("gzip decode failed: {err}"),
            })
        })?;
        if buf.len() as u64 > max_payload {
            reject("payload_too_large");
            return Err(ApiError(CoreError::PayloadTooLarge {
                detail: format!("decompressed beyond cap {max_payload}"),
            }));
        }
        buf
    } else {
        body.to_vec()
    };

    let records = parse_and_validate(&decoded).map_err(|err| {
        reject("validation_failed");
        ApiError(err)
    })?;

    if records.len() > state.config.max_miners_per_upload {
        reject("payload_too_large");
        return Err(ApiError(CoreError::PayloadTooLarge {
            detail: format!(
                "{} records, cap {}",
                records.len(),
                state.config.max_miners_per_upload
            ),
        }));
    }

    // Tenant scoping: every record's miner must belong to the key's site.
    let site = identity.site_id.clone();
    let foreign = state.store.read(|t| {
        records
            .iter()
            .find(|r| t.miner(&site, &r.miner_id).is_none())
            .map(|r| r.miner_id.clone())
    });
    if let Some(miner_id) = foreign {
        reject("forbidden");
        // Scoping rejects are attributable, so they do get an upload-log row.
        let log_result = state.store.transact(|txn| {
            txn.append_upload_log(UploadLogRow {
                id: Uuid::new_v4(),
                site_id: site.clone(),
                key_id: identity.key_id,
                received_at: Utc::now(),
                miner_count: records.len(),
                online_count: 0,
                offline_count: 0,
                processing_time_ms: started.elapsed().as_millis() as u64,
                payload_size_bytes: decoded.len() as u64,
                compression,
                client_ip: client_ip(&headers),
                outcome: UploadOutcome::Rejected,
                reject_reason: Some("forbidden".into()),
            });
            Ok(())
        });
        if let Err(err) = log_result {
            warn!(%err, "Failed to log rejected upload");
        }
        return Err(ApiError(CoreError::Forbidden(format!(
            "miner {miner_id} is not registered to site {site}"
        ))));
    }

    let online = records.iter().filter(|r| r.is_online()).count();
    let offline = records.len() - online;
    let processed = records.len();
    let payload_size = decoded.len() as u64;
    let ip = client_ip(&headers);

    persist_batch(
        &state,
        &identity.key_id,
        &site,
        records,
        compression,
        payload_size,
        ip,
        started,
    )
    .map_err(|err| ApiError(err.to_core()))?;

    let elapsed = started.elapsed();
    UPLOADS.with_label_values(&["accepted", "none"]).inc();
    RECORDS_ACCEPTED.inc_by(processed as f64);
    UPLOAD_DURATION.observe(elapsed.as_secs_f64());
    debug!(site = %site, processed, online, offline, "Upload accepted");

    let body = Json(UploadResponse {
        processed,
        online,
        offline,
        processing_time_ms: elapsed.as_millis() as u64,
    });
    let response = (StatusCode::OK, body).into_response();
    Ok(with_rate_headers(response, &decision))
}

/// Live upsert + history append + upload log, one transaction. The live
/// snapshot can never be observed ahead of its history row.
#[allow(clippy::too_many_arguments)]
fn persist_batch(
    state: &AppState,
    key_id: &shared_types::KeyId,
    site: &shared_types::SiteId,
    records: Vec<TelemetryRecord>,
    compression: Compression,
    payload_size: u64,
    client_ip: String,
    started: Instant,
) -> Result<(), StoreError> {
    let online = records.iter().filter(|r| r.is_online()).count();
    let offline = records.len() - online;
    let count = records.len();

    state.store.transact(|txn| {
        let now = Utc::now();
        for record in &records {
            let was_online = txn
                .live(site, &record.miner_id)
                .map(|row| row.record.is_online());

            txn.upsert_live(TelemetryLiveRow {
                site_id: site.clone(),
                record: record.clone(),
                updated_at: now,
            });
            txn.append_history(TelemetryHistoryRow {
                site_id: site.clone(),
                record: record.clone(),
                timestamp: record.timestamp.unwrap_or(now),
            });

            // Telemetry-driven event chaining: a miner that just went
            // offline becomes a domain event for the consumers.
            if was_online == Some(true) && !record.is_online() {
                let tenant = txn
                    .miner(site, &record.miner_id)
                    .map(|m| m.tenant_id.clone())
                    .ok_or(StoreError::ForeignKey {
                        table: "miners",
                        key: format!("{site}/{}", record.miner_id),
                    })?;
                append_event(
                    txn,
                    EventKind::from("miner.offline"),
                    tenant,
                    Some(record.miner_id.to_string()),
                    serde_json::json!({
                        "miner_id": record.miner_id,
                        "site_id": site,
                        "error": record.error_message,
                    }),
                    None,
                )?;
            }
        }

        txn.append_upload_log(UploadLogRow {
            id: Uuid::new_v4(),
            site_id: site.clone(),
            key_id: *key_id,
            received_at: now,
            miner_count: count,
            online_count: online,
            offline_count: offline,
            processing_time_ms: started.elapsed().as_millis() as u64,
            payload_size_bytes: payload_size,
            compression,
            client_ip: client_ip.clone(),
            outcome: UploadOutcome::Accepted,
            reject_reason: None,
        });
        Ok(())
    })
}
