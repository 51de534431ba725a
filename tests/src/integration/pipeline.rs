//! Outbox → publisher → bus → consumer pipeline properties.

use crate::support::{fast_config, site, tenant};
use chrono::Utc;
use control_runtime::{register_miner, Application};
use hs_05_consumer_runtime::{Consumer, EventHandler, HandlerError, Outcome};
use hs_06_dlq_replayer::{DlqFilter, DlqReplayer};
use hs_07_collector_ingest::StaticSessionAuth;
use hs_03_cdc_publisher::OutboxPublisher;
use parking_lot::Mutex;
use shared_bus::{MessageBus, Transport};
use shared_store::{append_event, Store};
use shared_types::config::{ConsumerConfig, OutboxConfig};
use shared_types::{EventEnvelope, EventId, EventKind, MinerId, TenantId};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        max_retries: 3,
        backoff_base: Duration::from_millis(1),
        entity_lock_ttl: Duration::from_secs(60),
        worker_slots: 8,
    }
}

fn envelope_for(kind: &str, entity: &str, payload: serde_json::Value) -> EventEnvelope {
    EventEnvelope {
        event_id: EventId::new(),
        kind: EventKind::from(kind),
        tenant_id: tenant(),
        entity_id: Some(entity.to_string()),
        created_at: Utc::now(),
        payload,
        replayed: false,
    }
}

/// Business write → outbox → consumer → derived view, within
/// the 3 s visibility SLO; published stamp and inbox row present.
#[tokio::test]
async fn scenario_outbox_to_consumer_happy_path() {
    let app = Application::build(fast_config(), Arc::new(StaticSessionAuth::new()));
    let store = app.store.clone();
    let running = app.start();

    register_miner(
        &store,
        &tenant(),
        &site(),
        &MinerId::from("M7"),
        serde_json::json!({"ip": "10.0.0.7"}),
    )
    .unwrap();

    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let done = store.read(|t| {
                t.portfolio(&tenant()).map(|p| p.miner_count) == Some(1)
            });
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("derived miner count visible within SLO");

    store.read(|t| {
        let (unpublished, _) = t.outbox_backlog(Utc::now());
        assert_eq!(unpublished, 0, "published_at stamped");
        assert_eq!(t.inbox_for("portfolio").count(), 1);
    });

    running.shutdown().await;
}

/// The outbox row exists iff the business transaction committed.
#[test]
fn atomic_outbox_with_business_write() {
    let store = Store::new();

    // Committed: miner row + outbox row.
    register_miner(
        &store,
        &tenant(),
        &site(),
        &MinerId::from("M1"),
        serde_json::json!({}),
    )
    .unwrap();
    store.read(|t| assert_eq!(t.outbox_len(), 1));

    // Rolled back (duplicate miner): no second outbox row.
    let _ = register_miner(
        &store,
        &tenant(),
        &site(),
        &MinerId::from("M1"),
        serde_json::json!({}),
    );
    store.read(|t| assert_eq!(t.outbox_len(), 1));
}

/// Five duplicate deliveries, one inbox row, side effects
/// applied once.
#[tokio::test]
async fn duplicate_deliveries_have_single_effect() {
    let store = Store::new();
    let bus = MessageBus::new();
    bus.create_topic("events.miner", 1);
    let sub = bus.subscribe("portfolio", "events.miner").unwrap();

    let applied = Arc::new(AtomicU32::new(0));
    let applied_in_handler = Arc::clone(&applied);
    let handler = Arc::new(move |_env: &EventEnvelope, _txn: &mut shared_store::Txn<'_>| {
        applied_in_handler.fetch_add(1, Ordering::SeqCst);
        Ok::<(), HandlerError>(())
    });
    let consumer = Consumer::new("portfolio", store.clone(), handler, fast_consumer_config());

    let envelope = envelope_for("miner.added", "M7", serde_json::json!({"ip": "10.0.0.7"}));
    for _ in 0..5 {
        bus.publish("events.miner", envelope.clone()).await.unwrap();
    }
    for expected in [
        Outcome::Processed,
        Outcome::Duplicate,
        Outcome::Duplicate,
        Outcome::Duplicate,
        Outcome::Duplicate,
    ] {
        let delivery = sub.next(0).await;
        assert_eq!(consumer.process_delivery(delivery).await, expected);
    }

    assert_eq!(applied.load(Ordering::SeqCst), 1);
    store.read(|t| assert_eq!(t.inbox_len(), 1));
}

/// Equal partition keys process in created_at order.
#[tokio::test]
async fn per_partition_order_preserved() {
    let store = Store::new();
    let bus = MessageBus::new();
    bus.create_topic("events.miner", 4);
    let sub = bus.subscribe("order", "events.miner").unwrap();

    let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_handler = Arc::clone(&seen);
    let handler = Arc::new(move |env: &EventEnvelope, _txn: &mut shared_store::Txn<'_>| {
        seen_in_handler
            .lock()
            .push(env.payload["seq"].as_u64().unwrap());
        Ok::<(), HandlerError>(())
    });
    let consumer = Arc::new(Consumer::new("order", store, handler, fast_consumer_config()));
    let handle = Arc::clone(&consumer).start(sub);

    for seq in 0..20u64 {
        bus.publish(
            "events.miner",
            envelope_for("miner.added", "M7", serde_json::json!({"seq": seq, "ip": "x"})),
        )
        .await
        .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if seen.lock().len() == 20 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("all events consumed");

    let order = seen.lock().clone();
    assert_eq!(order, (0..20).collect::<Vec<u64>>());
    handle.shutdown().await;
}

/// A poison event dead-letters after the retry budget and
/// the partition keeps advancing.
#[tokio::test]
async fn poison_event_dead_letters_and_partition_advances() {
    let store = Store::new();
    let bus = MessageBus::new();
    bus.create_topic("events.miner", 1);
    let sub = bus.subscribe("portfolio", "events.miner").unwrap();

    let handler = Arc::new(
        control_runtime::handlers::PortfolioHandler::default(),
    );
    let consumer = Consumer::new("portfolio", store.clone(), handler, fast_consumer_config());

    // Poison: ip is an integer, a consume-boundary schema violation.
    let poison = envelope_for("miner.added", "M7", serde_json::json!({"ip": 1007}));
    let healthy = envelope_for("miner.added", "M8", serde_json::json!({"ip": "10.0.0.8"}));
    bus.publish("events.miner", poison.clone()).await.unwrap();
    bus.publish("events.miner", healthy).await.unwrap();

    let delivery = sub.next(0).await;
    assert_eq!(consumer.process_delivery(delivery).await, Outcome::DeadLettered);

    // Partition advances past the dead letter.
    let delivery = sub.next(0).await;
    assert_eq!(consumer.process_delivery(delivery).await, Outcome::Processed);

    store.read(|t| {
        let rows: Vec<_> = t.dlq_iter().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_id, poison.event_id);
        assert_eq!(rows[0].error_kind, shared_types::ErrorKind::Permanent);
        assert!(!t.inbox_contains("portfolio", poison.event_id));
        assert_eq!(t.portfolio(&tenant()).unwrap().miner_count, 1);
    });
}

/// Replay after the cause is fixed processes the event; the inbox row
/// appears and no new DLQ row is created.
#[tokio::test]
async fn replay_after_fix_restores_processing() {
    let store = Store::new();
    let bus = Arc::new(MessageBus::new());
    bus.create_topic("events.miner", 1);
    let sub = bus.subscribe("portfolio", "events.miner").unwrap();

    let broken = Arc::new(AtomicBool::new(true));
    let broken_in_handler = Arc::clone(&broken);
    let handler = Arc::new(move |_env: &EventEnvelope, _txn: &mut shared_store::Txn<'_>| {
        if broken_in_handler.load(Ordering::SeqCst) {
            Err(HandlerError::Permanent("downstream schema missing".into()))
        } else {
            Ok(())
        }
    });
    let consumer = Consumer::new("portfolio", store.clone(), handler, fast_consumer_config());

    let envelope = envelope_for("miner.added", "M7", serde_json::json!({"ip": "10.0.0.7"}));
    bus.publish("events.miner", envelope.clone()).await.unwrap();
    let delivery = sub.next(0).await;
    assert_eq!(consumer.process_delivery(delivery).await, Outcome::DeadLettered);

    // Fix the cause, replay the DLQ entry.
    broken.store(false, Ordering::SeqCst);
    let replayer = DlqReplayer::new(store.clone(), bus.clone());
    let report = replayer.replay(&DlqFilter::default(), 10, false).await;
    assert_eq!(report.replayed, 1);

    let delivery = sub.next(0).await;
    assert!(delivery.envelope.replayed);
    assert_eq!(consumer.process_delivery(delivery).await, Outcome::Processed);

    store.read(|t| {
        assert!(t.inbox_contains("portfolio", envelope.event_id));
        // The original row remains, stamped; no new DLQ rows.
        assert_eq!(t.dlq_iter().count(), 1);
        assert_eq!(t.dlq_open_count(), 0);
    });
}

/// The publisher never advances past a failing row, so a consumer that
/// subscribes late still sees every event in order.
#[tokio::test]
async fn publisher_halts_without_loss_on_missing_topic() {
    let store = Store::new();
    let bus = Arc::new(MessageBus::new());
    // events.miner intentionally missing at first.
    store
        .transact(|txn| {
            append_event(
                txn,
                EventKind::from("miner.added"),
                TenantId::from("T1"),
                Some("M1".into()),
                serde_json::json!({"ip": "a"}),
                None,
            )?;
            Ok(())
        })
        .unwrap();

    let publisher = OutboxPublisher::new(store.clone(), bus.clone(), OutboxConfig::default());
    assert!(publisher.publish_batch().await.is_err());
    store.read(|t| {
        let (unpublished, _) = t.outbox_backlog(Utc::now());
        assert_eq!(unpublished, 1);
    });

    // Operator creates the topic; the row flows on the next pass.
    bus.create_topic("events.miner", 1);
    let sub = bus.subscribe("portfolio", "events.miner").unwrap();
    // The breaker opened on the permanent error; wait out its probe window
    // is configuration-dependent, so publish directly through a fresh
    // publisher the way a restarted process would.
    let fresh = OutboxPublisher::new(store.clone(), bus.clone(), OutboxConfig::default());
    assert_eq!(fresh.publish_batch().await.unwrap(), 1);
    assert_eq!(sub.depth(0), 1);
}
