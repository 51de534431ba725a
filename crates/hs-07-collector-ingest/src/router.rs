//! Router assembly.

use crate::routes::{audit, commands, health, upload};
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the full ingest router over the shared state.
///
/// The body limit guards the raw (possibly compressed) request; the
/// decompressed cap is enforced by the upload handler itself.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_payload_size as usize;

    Router::new()
        .route("/collector/upload", post(upload::upload))
        .route("/collector/commands/pending", get(commands::pending))
        .route("/collector/commands/:id/result", post(commands::result))
        .route("/commands", post(commands::create))
        .route("/commands/:id/approve", post(commands::approve))
        .route("/commands/:id/cancel", post(commands::cancel))
        .route("/audit/verify", get(audit::verify))
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StaticSessionAuth;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use hs_08_command_queue::CommandService;
    use sha2::{Digest, Sha256};
    use shared_bus::MessageBus;
    use shared_store::{CollectorKeyRow, MinerRow, Store};
    use shared_types::config::{CommandConfig, IngestConfig};
    use shared_types::{
        Actor, KeyId, MinerId, SiteId, TenantId, TenantScopedAuthorizer,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    const KEY: &str = "hsc_test-key";

    fn test_state() -> (AppState, Store) {
        let store = Store::new();
        store
            .transact(|txn| {
                txn.insert_collector_key(CollectorKeyRow {
                    id: KeyId::new(),
                    site_id: SiteId::from("S1"),
                    key_hash: hex::encode(Sha256::digest(KEY.as_bytes())),
                    created_at: Utc::now(),
                    revoked_at: None,
                })?;
                for miner in ["M1", "M2", "M3"] {
                    txn.insert_miner(MinerRow {
                        site_id: SiteId::from("S1"),
                        miner_id: MinerId::from(miner),
                        tenant_id: TenantId::from("T1"),
                        registered_at: Utc::now(),
                    })?;
                }
                Ok(())
            })
            .unwrap();

        let commands = Arc::new(CommandService::new(store.clone(), CommandConfig::default()));
        let sessions = StaticSessionAuth::new()
            .with_token("tok-user", Actor::user("u1", TenantId::from("T1")));
        let state = AppState::new(
            store.clone(),
            Arc::new(MessageBus::new()),
            commands,
            Arc::new(sessions),
            Arc::new(TenantScopedAuthorizer),
            IngestConfig::default(),
        );
        (state, store)
    }

    fn upload_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/collector/upload")
            .header("X-Collector-Key", KEY)
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_happy_path() {
        let (state, store) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(upload_request(serde_json::json!([
                { "miner_id": "M1", "online": true, "hashrate_ghs": 100.0 },
                { "miner_id": "M2", "online": false },
            ])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["X-RateLimit-Limit"], "60");
        assert_eq!(response.headers()["X-RateLimit-Remaining"], "59");

        let bytes = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["processed"], 2);
        assert_eq!(body["online"], 1);
        assert_eq!(body["offline"], 1);

        store.read(|t| {
            assert_eq!(t.live_iter().count(), 2);
            assert_eq!(t.history().len(), 2);
            assert_eq!(t.upload_log().len(), 1);
        });
    }

    #[tokio::test]
    async fn test_upload_rejects_unauthenticated() {
        let (state, store) = test_state();
        let app = build_router(state);

        let request = Request::builder()
            .method("POST")
            .uri("/collector/upload")
            .header("Content-Type", "application/json")
            .body(Body::from("[]"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        store.read(|t| assert_eq!(t.upload_log().len(), 0));
    }

    #[tokio::test]
    async fn test_upload_validation_failure_leaves_no_rows() {
        let (state, store) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(upload_request(serde_json::json!([
                { "miner_id": "M1", "hashrate_ghs": "not-a-number" },
            ])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        store.read(|t| {
            assert_eq!(t.live_iter().count(), 0);
            assert_eq!(t.history().len(), 0);
            assert_eq!(t.upload_log().len(), 0);
        });
    }

    #[tokio::test]
    async fn test_upload_foreign_miner_forbidden() {
        let (state, store) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(upload_request(serde_json::json!([
                { "miner_id": "M1", "online": true },
                { "miner_id": "intruder", "online": true },
            ])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        store.read(|t| {
            assert_eq!(t.live_iter().count(), 0);
            // Scoping rejections are attributable and logged.
            assert_eq!(t.upload_log().len(), 1);
            assert_eq!(t.upload_log()[0].reject_reason.as_deref(), Some("forbidden"));
        });
    }

    #[tokio::test]
    async fn test_upload_gzip_roundtrip() {
        use flate2::write::GzEncoder;
        use std::io::Write;

        let (state, store) = test_state();
        let app = build_router(state);

        let payload =
            serde_json::to_vec(&serde_json::json!([{ "miner_id": "M1", "online": true }]))
                .unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/collector/upload")
            .header("X-Collector-Key", KEY)
            .header("Content-Type", "application/json")
            .header("Content-Encoding", "gzip")
            .body(Body::from(compressed))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        store.read(|t| assert_eq!(t.history().len(), 1));
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429_with_headers() {
        let (mut state, _store) = test_state();
        state.limiter = Arc::new(crate::rate_limit::SlidingWindowLimiter::new(
            2,
            std::time::Duration::from_secs(60),
        ));
        let app = build_router(state);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(upload_request(serde_json::json!([
                    { "miner_id": "M1", "online": true }
                ])))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(upload_request(serde_json::json!([
                { "miner_id": "M1", "online": true }
            ])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("Retry-After"));
        assert_eq!(response.headers()["X-RateLimit-Remaining"], "0");
    }

    #[tokio::test]
    async fn test_command_create_requires_session() {
        let (state, _store) = test_state();
        let app = build_router(state);

        let spec = serde_json::json!({
            "tenant_id": "T1",
            "site_id": "S1",
            "requester_id": "u1",
            "command_type": "reboot",
            "target_scope": "miner",
            "target_ids": ["M1"],
        });

        let request = Request::builder()
            .method("POST")
            .uri("/commands")
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&spec).unwrap()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_endpoint_is_open() {
        let (state, _store) = test_state();
        let app = build_router(state);

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["components"].is_array());
    }
}
