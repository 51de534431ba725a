//! Command round-trips between the queue service and an in-process edge.

use crate::support::{app_state, device, seeded_store, site, tenant, DEVICE_SECRET, USER_TOKEN};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use hs_07_collector_ingest::build_router;
use hs_08_command_queue::CommandService;
use hs_09_edge_collector::{
    CgMinerClient, ClientConfig, CommandRunner, IngestApi, UploadAck, UploadError, EXEC_WHITELIST,
};
use hs_09_edge_collector::config::MinerTarget;
use shared_types::{
    Actor, CommandId, CommandResultReport, CommandSpec, CommandStatus, CommandType,
    MinerId, PendingCommand, TargetScope, TelemetryRecord,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;

/// The in-process test adapter for the edge: straight onto the service.
struct InProcessApi {
    service: Arc<CommandService>,
}

#[async_trait]
impl IngestApi for InProcessApi {
    async fn upload(&self, _records: &[TelemetryRecord]) -> Result<UploadAck, UploadError> {
        Ok(UploadAck { processed: 0, online: 0, offline: 0 })
    }

    async fn fetch_commands(&self, wait: Duration) -> Result<Vec<PendingCommand>, UploadError> {
        self.service
            .fetch_pending(&site(), &device(), wait)
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))
    }

    async fn report_result(
        &self,
        id: CommandId,
        report: &CommandResultReport,
    ) -> Result<(), UploadError> {
        self.service
            .report_result(id, &device(), report)
            .map(|_| ())
            .map_err(|err| UploadError::Transport(err.to_string()))
    }
}

fn exec_client() -> CgMinerClient {
    CgMinerClient::with_whitelist(
        ClientConfig {
            connect_timeout: Duration::from_millis(300),
            send_timeout: Duration::from_millis(300),
            recv_timeout: Duration::from_millis(300),
            attempts: 1,
            backoff_base: Duration::from_millis(1),
        },
        EXEC_WHITELIST,
    )
}

/// A fake miner accepting any command with an OK status.
async fn obedient_miner() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let mut wire = serde_json::to_vec(&serde_json::json!({
                    "STATUS": [{"STATUS": "S", "Msg": "ok"}]
                }))
                .unwrap();
                wire.push(0);
                let _ = socket.write_all(&wire).await;
            });
        }
    });
    addr
}

fn reboot_spec(targets: Vec<String>) -> CommandSpec {
    CommandSpec {
        tenant_id: tenant(),
        site_id: site(),
        requester_id: "u1".into(),
        command_type: CommandType::Reboot,
        target_scope: TargetScope::Miner,
        target_ids: targets,
        payload: serde_json::json!({}),
        idempotency_key: None,
        ttl_minutes: Some(5),
        require_approval: false,
        priority: 0,
    }
}

/// Reboot two miners; one executes, one is unreachable. The
/// parent aggregates to `failed`, the audit chain grows and verifies.
#[tokio::test]
async fn command_round_trip_aggregates_partial_failure() {
    let store = seeded_store(&["M-A", "M-B"]);
    let service = Arc::new(CommandService::new(
        store.clone(),
        shared_types::config::CommandConfig::default(),
    ));

    let outcome = service
        .create(&reboot_spec(vec!["M-A".into(), "M-B".into()]), &Actor::user("u1", tenant()))
        .unwrap();

    // Edge fleet: A answers, B's port is closed.
    let addr_a = obedient_miner().await;
    let fleet = [
        MinerTarget { id: MinerId::from("M-A"), addr: addr_a },
        MinerTarget { id: MinerId::from("M-B"), addr: "127.0.0.1:1".into() },
    ];
    let api = Arc::new(InProcessApi { service: Arc::clone(&service) });
    let runner = CommandRunner::new(api, exec_client(), DEVICE_SECRET, &fleet);

    let handled = runner.poll_once(Duration::ZERO).await.unwrap();
    assert_eq!(handled, 1);

    store.read(|t| {
        let row = t.command(outcome.id).unwrap();
        assert_eq!(row.status, CommandStatus::Failed);

        let results = t.results_for(outcome.id);
        assert_eq!(results.len(), 2);
        let by_miner = |m: &str| {
            results
                .iter()
                .find(|r| r.miner_id == m)
                .unwrap()
                .result_status
        };
        assert_eq!(by_miner("M-A"), shared_types::CommandResultStatus::Succeeded);
        assert_eq!(by_miner("M-B"), shared_types::CommandResultStatus::Failed);
    });

    // create + complete audited; chain intact.
    let verification = hs_10_audit_chain::verify(&store, &tenant());
    assert!(verification.verify_ok);
    assert_eq!(verification.checked, 2);
}

/// Identical `(tenant, requester, idempotency_key)` over HTTP returns
/// the same command id and leaves one row.
#[tokio::test]
async fn command_creation_idempotent_over_http() {
    let store = seeded_store(&["M1"]);
    let state = app_state(store.clone());
    let app = build_router(state);

    let body = serde_json::json!({
        "tenant_id": "T1",
        "site_id": "S1",
        "requester_id": "u1",
        "command_type": "set_freq",
        "target_scope": "miner",
        "target_ids": ["M1"],
        "payload": {"mhz": 650},
        "idempotency_key": "req-42",
    });
    let request = |body: &serde_json::Value| {
        Request::builder()
            .method("POST")
            .uri("/commands")
            .header("Authorization", format!("Bearer {USER_TOKEN}"))
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    };

    let first = app.clone().oneshot(request(&body)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first_body: serde_json::Value = serde_json::from_slice(
        &http_body_util::BodyExt::collect(first.into_body())
            .await
            .unwrap()
            .to_bytes(),
    )
    .unwrap();

    let second = app.oneshot(request(&body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second_body: serde_json::Value = serde_json::from_slice(
        &http_body_util::BodyExt::collect(second.into_body())
            .await
            .unwrap()
            .to_bytes(),
    )
    .unwrap();

    assert_eq!(first_body["id"], second_body["id"]);
    assert_eq!(second_body["deduped"], true);
    store.read(|t| assert_eq!(t.commands_iter().count(), 1));
}

/// Tampering any dispatch field makes the edge refuse execution and
/// the server refuse the result.
#[tokio::test]
async fn tampered_dispatch_refused_on_both_ends() {
    let store = seeded_store(&["M1"]);
    let service = Arc::new(CommandService::new(
        store.clone(),
        shared_types::config::CommandConfig::default(),
    ));
    service
        .create(&reboot_spec(vec!["M1".into()]), &Actor::user("u1", tenant()))
        .unwrap();

    let mut fetched = service
        .fetch_pending(&site(), &device(), Duration::ZERO)
        .await
        .unwrap();
    let mut command = fetched.remove(0);
    let genuine_nonce = command.dispatch_nonce;

    // Man-in-the-middle rewrites the payload on the way down.
    command.payload = serde_json::json!({"delay_s": 0, "extra": true});

    let addr = obedient_miner().await;
    let fleet = [MinerTarget { id: MinerId::from("M1"), addr }];
    let api = Arc::new(InProcessApi { service: Arc::clone(&service) });
    let runner = CommandRunner::new(api, exec_client(), DEVICE_SECRET, &fleet);

    // Edge side: refused without touching the miner.
    assert!(!runner.verify(&command));

    // Server side: a result whose signature does not match the stored
    // dispatch fields is refused even with the right nonce.
    let report = CommandResultReport {
        dispatch_nonce: genuine_nonce,
        signature: "00".repeat(32),
        results: vec![shared_types::MinerResultEntry {
            miner_id: "M1".into(),
            status: shared_types::CommandResultStatus::Succeeded,
            message: None,
            metrics: serde_json::json!({}),
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
        }],
    };
    let err = service
        .report_result(command.id, &device(), &report)
        .unwrap_err();
    assert!(matches!(err, shared_types::CoreError::Forbidden(_)));
}

/// The long-poll returns early when a command arrives mid-wait.
#[tokio::test]
async fn long_poll_wakes_on_new_command() {
    let store = seeded_store(&["M1"]);
    let service = Arc::new(CommandService::new(
        store.clone(),
        shared_types::config::CommandConfig::default(),
    ));

    let fetching = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .fetch_pending(&site(), &device(), Duration::from_secs(10))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    service
        .create(&reboot_spec(vec!["M1".into()]), &Actor::user("u1", tenant()))
        .unwrap();

    let fetched = tokio::time::timeout(Duration::from_secs(2), fetching)
        .await
        .expect("long-poll woke")
        .unwrap()
        .unwrap();
    assert_eq!(fetched.len(), 1);
}
