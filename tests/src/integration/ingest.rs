//! Ingest HTTP surface: closed-world validation, caps, rate limiting.

use crate::support::{app_state, seeded_store, COLLECTOR_KEY};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use hs_07_collector_ingest::build_router;
use tower::ServiceExt;

fn upload_request(body: Vec<u8>, gzip: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/collector/upload")
        .header("X-Collector-Key", COLLECTOR_KEY)
        .header("Content-Type", "application/json");
    if gzip {
        builder = builder.header("Content-Encoding", "gzip");
    }
    builder.body(Body::from(body)).unwrap()
}

fn gzip_bytes(raw: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use std::io::Write;
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(raw).unwrap();
    encoder.finish().unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// A five-miner gzip batch is accepted with correct counters
/// and exactly one upload-log row, five live upserts, five history rows.
#[tokio::test]
async fn gzip_batch_accepted_with_counts() {
    let store = seeded_store(&["M1", "M2", "M3", "M4", "M5"]);
    let state = app_state(store.clone());
    let app = build_router(state);

    let records = serde_json::json!([
        { "miner_id": "M1", "online": true, "hashrate_ghs": 100.0 },
        { "miner_id": "M2", "online": true, "hashrate_ghs": 98.5 },
        { "miner_id": "M3", "online": true, "hashrate_ghs": 95.1 },
        { "miner_id": "M4", "online": true, "hashrate_ghs": 110.0 },
        { "miner_id": "M5", "online": false, "error_message": "connection: refused" },
    ]);
    let compressed = gzip_bytes(&serde_json::to_vec(&records).unwrap());

    let response = app.oneshot(upload_request(compressed, true)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["processed"], 5);
    assert_eq!(body["online"], 4);
    assert_eq!(body["offline"], 1);
    assert!(body["processing_time_ms"].is_u64());

    store.read(|t| {
        assert_eq!(t.upload_log().len(), 1);
        assert_eq!(t.upload_log()[0].online_count, 4);
        assert_eq!(t.live_iter().count(), 5);
        assert_eq!(t.history().len(), 5);
    });
}

/// Every malformed-batch class rejects whole with the right status and
/// zero rows anywhere.
#[tokio::test]
async fn malformed_batches_reject_closed() {
    let store = seeded_store(&["M1", "M2"]);
    let state = app_state(store.clone());
    let app = build_router(state);

    let cases: Vec<(serde_json::Value, StatusCode)> = vec![
        // type mismatch
        (
            serde_json::json!([{ "miner_id": "M1", "hashrate_ghs": "fast" }]),
            StatusCode::BAD_REQUEST,
        ),
        // out of range
        (
            serde_json::json!([{ "miner_id": "M1", "temperature_avg": 2000.0 }]),
            StatusCode::BAD_REQUEST,
        ),
        // over-cardinality
        (
            serde_json::json!([{ "miner_id": "M1", "fan_speeds": vec![1u32; 21] }]),
            StatusCode::BAD_REQUEST,
        ),
        // over-length string
        (
            serde_json::json!([{ "miner_id": "M1", "model": "x".repeat(1000) }]),
            StatusCode::BAD_REQUEST,
        ),
        // duplicate miner_id in batch
        (
            serde_json::json!([{ "miner_id": "M1" }, { "miner_id": "M1" }]),
            StatusCode::BAD_REQUEST,
        ),
    ];

    for (records, expected) in cases {
        let response = app
            .clone()
            .oneshot(upload_request(serde_json::to_vec(&records).unwrap(), false))
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "validation");
    }

    store.read(|t| {
        assert_eq!(t.live_iter().count(), 0);
        assert_eq!(t.history().len(), 0);
        assert_eq!(t.upload_log().len(), 0);
    });
}

/// Decompressed size cap: a tiny gzip body expanding past the cap is 413.
#[tokio::test]
async fn decompression_bomb_rejected() {
    let store = seeded_store(&["M1"]);
    let mut state = app_state(store.clone());
    state.config.max_payload_size = 64 * 1024;
    let app = build_router(state);

    // 1 MiB of spaces compresses to almost nothing but inflates past the
    // 64 KiB cap.
    let mut raw = vec![b' '; 1024 * 1024];
    raw[0] = b'[';
    let last = raw.len() - 1;
    raw[last] = b']';
    let compressed = gzip_bytes(&raw);
    assert!(compressed.len() < 64 * 1024);

    let response = app.oneshot(upload_request(compressed, true)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    store.read(|t| assert_eq!(t.upload_log().len(), 0));
}

/// Record-count cap.
#[tokio::test]
async fn record_count_cap_rejects() {
    let store = seeded_store(&["M1"]);
    let mut state = app_state(store.clone());
    state.config.max_miners_per_upload = 3;
    let app = build_router(state);

    let records: Vec<serde_json::Value> = (0..4)
        .map(|i| serde_json::json!({ "miner_id": format!("M{i}") }))
        .collect();
    let response = app
        .oneshot(upload_request(
            serde_json::to_vec(&records).unwrap(),
            false,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

/// 65 rapid uploads from one key; exactly 60 accepted,
/// 5 rejected with Retry-After in (0, 60], headers consistent throughout.
#[tokio::test]
async fn sliding_window_admits_exactly_the_quota() {
    let store = seeded_store(&["M1"]);
    let state = app_state(store.clone());
    let app = build_router(state);

    let mut accepted = 0;
    let mut rejected = 0;
    for i in 0..65 {
        let response = app
            .clone()
            .oneshot(upload_request(
                serde_json::to_vec(&serde_json::json!([
                    { "miner_id": "M1", "online": true }
                ]))
                .unwrap(),
                false,
            ))
            .await
            .unwrap();

        match response.status() {
            StatusCode::OK => {
                accepted += 1;
                // limit - remaining tracks the accepted count.
                let remaining: u32 = response.headers()["X-RateLimit-Remaining"]
                    .to_str()
                    .unwrap()
                    .parse()
                    .unwrap();
                assert_eq!(60 - remaining, accepted, "at request {i}");
            }
            StatusCode::TOO_MANY_REQUESTS => {
                rejected += 1;
                let retry: u64 = response.headers()["Retry-After"]
                    .to_str()
                    .unwrap()
                    .parse()
                    .unwrap();
                assert!(retry > 0 && retry <= 60);
            }
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(accepted, 60);
    assert_eq!(rejected, 5);
    store.read(|t| assert_eq!(t.upload_log().len(), 60));
}

/// A miner going offline between uploads chains a `miner.offline` event
/// into the outbox inside the upload transaction.
#[tokio::test]
async fn offline_transition_chains_event() {
    let store = seeded_store(&["M1"]);
    let state = app_state(store.clone());
    let app = build_router(state);

    let up = serde_json::json!([{ "miner_id": "M1", "online": true }]);
    let down = serde_json::json!([
        { "miner_id": "M1", "online": false, "error_message": "timeout: receive" }
    ]);

    let response = app
        .clone()
        .oneshot(upload_request(serde_json::to_vec(&up).unwrap(), false))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    store.read(|t| assert_eq!(t.outbox_len(), 0));

    let response = app
        .oneshot(upload_request(serde_json::to_vec(&down).unwrap(), false))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    store.read(|t| {
        assert_eq!(t.outbox_len(), 1);
        let row = t.outbox_unpublished(1).remove(0);
        assert_eq!(row.kind.as_str(), "miner.offline");
        assert_eq!(row.entity_id.as_deref(), Some("M1"));
    });
}
