//! `GET /health` and `GET /metrics`.

use crate::state::AppState;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use hs_telemetry::metrics::{CONSUMER_LAG, DLQ_OPEN, OUTBOX_BACKLOG};
use hs_telemetry::{HealthReport, HealthSnapshot};
use std::collections::BTreeMap;

/// Assemble and evaluate the SLO report.
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let db_roundtrip = state.store.ping();
    let now = Utc::now();

    let (outbox_backlog, outbox_oldest_age, dlq_open, dlq_breakdown, freshness) =
        state.store.read(|t| {
            let (backlog, oldest) = t.outbox_backlog(now);
            let mut buckets: BTreeMap<(String, String), usize> = BTreeMap::new();
            for row in t.dlq_iter().filter(|r| !r.replayed) {
                *buckets
                    .entry((row.consumer_name.clone(), row.event_kind.as_str().to_string()))
                    .or_default() += 1;
            }
            let breakdown: Vec<(String, String, usize)> = buckets
                .into_iter()
                .map(|((consumer, kind), count)| (consumer, kind, count))
                .collect();
            let freshness = t.derived_freshness().map(|at| now - at);
            (backlog, oldest, t.dlq_open_count(), breakdown, freshness)
        });

    let consumer_lag = state.bus.total_lag();
    OUTBOX_BACKLOG.set(outbox_backlog as f64);
    CONSUMER_LAG.set(consumer_lag as f64);
    DLQ_OPEN.set(dlq_open as f64);

    let snapshot = HealthSnapshot {
        db_roundtrip: Some(db_roundtrip),
        outbox_backlog,
        outbox_oldest_age: outbox_oldest_age.and_then(|d| d.to_std().ok()),
        consumer_lag,
        dlq_open,
        dlq_breakdown,
        cache_hit_rate: state.key_cache.hit_rate(),
        derived_freshness_age: freshness.and_then(|d| d.to_std().ok()),
        write_to_visible_p95: state.latency.p95(),
    };

    Json(HealthReport::evaluate(&snapshot))
}

/// Prometheus text exposition.
pub async fn metrics() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        hs_telemetry::gather_text(),
    )
}
