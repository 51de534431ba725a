//! # DLQ Replayer - Operator Tooling for Dead Letters
//!
//! Three operations over the dlq table:
//!
//! - `stats(filter)`: count plus `(consumer, kind)` breakdown.
//! - `list(filter)`: matching rows for inspection.
//! - `replay(filter, limit, dry_run)`: re-publish each matching envelope
//!   to its original topic with `replayed = true`. Success stamps
//!   `replayed_at`; the row stays behind for audit.
//!
//! Replay is deliberately boring: the envelope was captured whole at
//! dead-letter time, so re-injection needs nothing but the transport.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use chrono::{DateTime, Utc};
use hs_03_cdc_publisher::route_topic;
use serde::Serialize;
use shared_bus::Transport;
use shared_store::{DlqRow, Store};
use shared_types::{EventEnvelope, EventKind, TenantId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Row selection for every replayer operation. Empty filter matches all
/// unreplayed rows.
#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    pub consumer_name: Option<String>,
    pub event_kind: Option<EventKind>,
    pub tenant: Option<TenantId>,
    pub failed_after: Option<DateTime<Utc>>,
    pub failed_before: Option<DateTime<Utc>>,
    /// Include rows already replayed (off by default).
    pub include_replayed: bool,
}

impl DlqFilter {
    fn matches(&self, row: &DlqRow) -> bool {
        if !self.include_replayed && row.replayed {
            return false;
        }
        if let Some(consumer) = &self.consumer_name {
            if row.consumer_name != *consumer {
                return false;
            }
        }
        if let Some(kind) = &self.event_kind {
            if row.event_kind != *kind {
                return false;
            }
        }
        if let Some(tenant) = &self.tenant {
            let row_tenant = row.payload.get("tenant_id").and_then(|v| v.as_str());
            if row_tenant != Some(tenant.as_str()) {
                return false;
            }
        }
        if let Some(after) = self.failed_after {
            if row.last_failed_at < after {
                return false;
            }
        }
        if let Some(before) = self.failed_before {
            if row.last_failed_at > before {
                return false;
            }
        }
        true
    }
}

/// `stats` output.
#[derive(Debug, Clone, Serialize)]
pub struct DlqStats {
    pub total: usize,
    /// `(consumer, event_kind)` buckets, sorted by key.
    pub breakdown: Vec<DlqBucket>,
}

/// One `(consumer, kind)` bucket.
#[derive(Debug, Clone, Serialize)]
pub struct DlqBucket {
    pub consumer: String,
    pub kind: String,
    pub count: usize,
}

/// `replay` output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub matched: usize,
    pub replayed: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub breakdown: Vec<DlqBucket>,
}

/// The replayer itself.
pub struct DlqReplayer {
    store: Store,
    transport: Arc<dyn Transport>,
}

impl DlqReplayer {
    /// Build a replayer over the store and transport.
    #[must_use]
    pub fn new(store: Store, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    /// Count matching rows and break them down by `(consumer, kind)`.
    #[must_use]
    pub fn stats(&self, filter: &DlqFilter) -> DlqStats {
        let rows = self.matching(filter, usize::MAX);
        DlqStats {
            total: rows.len(),
            breakdown: breakdown(&rows),
        }
    }

    /// Matching rows, oldest failure first.
    #[must_use]
    pub fn list(&self, filter: &DlqFilter) -> Vec<DlqRow> {
        self.matching(filter, usize::MAX)
    }

    /// Re-publish up to `limit` matching envelopes. With `dry_run` no
    /// side effects happen; the report shows what would be replayed.
    pub async fn replay(&self, filter: &DlqFilter, limit: usize, dry_run: bool) -> ReplayReport {
        let rows = self.matching(filter, limit);
        let mut report = ReplayReport {
            matched: rows.len(),
            dry_run,
            breakdown: breakdown(&rows),
            ..ReplayReport::default()
        };
        if dry_run {
            return report;
        }

        for row in rows {
            let mut envelope: EventEnvelope = match serde_json::from_value(row.payload.clone()) {
                Ok(env) => env,
                Err(err) => {
                    warn!(dlq_id = %row.id, %err, "DLQ payload is not an envelope, skipping");
                    report.failed += 1;
                    continue;
                }
            };
            envelope.replayed = true;
            let topic = route_topic(&envelope.kind);

            match self.transport.publish(topic, envelope).await {
                Ok(_) => {
                    let stamped = self
                        .store
                        .transact(|txn| txn.mark_dlq_replayed(row.id, Utc::now()));
                    if let Err(err) = stamped {
                        warn!(dlq_id = %row.id, %err, "Replayed but failed to stamp replayed_at");
                    }
                    report.replayed += 1;
                    info!(dlq_id = %row.id, event_id = %row.event_id, topic, "DLQ entry replayed");
                }
                Err(err) => {
                    warn!(dlq_id = %row.id, topic, %err, "Replay publish failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn matching(&self, filter: &DlqFilter, limit: usize) -> Vec<DlqRow> {
        self.store.read(|t| {
            let mut rows: Vec<DlqRow> = t
                .dlq_iter()
                .filter(|row| filter.matches(row))
                .cloned()
                .collect();
            rows.sort_by_key(|row| row.first_failed_at);
            rows.truncate(limit);
            rows
        })
    }
}

fn breakdown(rows: &[DlqRow]) -> Vec<DlqBucket> {
    let mut buckets: BTreeMap<(String, String), usize> = BTreeMap::new();
    for row in rows {
        *buckets
            .entry((row.consumer_name.clone(), row.event_kind.as_str().to_string()))
            .or_default() += 1;
    }
    buckets
        .into_iter()
        .map(|((consumer, kind), count)| DlqBucket { consumer, kind, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::MessageBus;
    use shared_types::EventId;
    use uuid::Uuid;

    fn dlq_row(consumer: &str, kind: &str, tenant: &str) -> DlqRow {
        let envelope = EventEnvelope {
            event_id: EventId::new(),
            kind: EventKind::from(kind),
            tenant_id: TenantId::from(tenant),
            entity_id: Some("M1".into()),
            created_at: Utc::now(),
            payload: serde_json::json!({"ip": "10.0.0.7"}),
            replayed: false,
        };
        DlqRow {
            id: Uuid::new_v4(),
            consumer_name: consumer.into(),
            event_id: envelope.event_id,
            event_kind: envelope.kind.clone(),
            payload: serde_json::to_value(&envelope).unwrap(),
            error_kind: shared_types::ErrorKind::Transient,
            error_detail: "timeout".into(),
            retry_count: 3,
            first_failed_at: Utc::now(),
            last_failed_at: Utc::now(),
            replayed: false,
            replayed_at: None,
        }
    }

    fn seeded_store() -> Store {
        let store = Store::new();
        store
            .transact(|txn| {
                txn.insert_dlq(dlq_row("portfolio", "miner.added", "T1"));
                txn.insert_dlq(dlq_row("portfolio", "miner.added", "T2"));
                txn.insert_dlq(dlq_row("crm", "crm.note_added", "T1"));
                Ok(())
            })
            .unwrap();
        store
    }

    #[test]
    fn test_stats_breakdown() {
        let replayer = DlqReplayer::new(seeded_store(), Arc::new(MessageBus::new()));
        let stats = replayer.stats(&DlqFilter::default());
        assert_eq!(stats.total, 3);
        assert_eq!(stats.breakdown.len(), 2);
        assert_eq!(stats.breakdown[0].consumer, "crm");
        assert_eq!(stats.breakdown[1].count, 2);
    }

    #[test]
    fn test_filter_by_consumer_and_tenant() {
        let replayer = DlqReplayer::new(seeded_store(), Arc::new(MessageBus::new()));

        let by_consumer = DlqFilter {
            consumer_name: Some("portfolio".into()),
            ..DlqFilter::default()
        };
        assert_eq!(replayer.list(&by_consumer).len(), 2);

        let by_tenant = DlqFilter {
            tenant: Some(TenantId::from("T1")),
            ..DlqFilter::default()
        };
        assert_eq!(replayer.list(&by_tenant).len(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_has_no_side_effects() {
        let store = seeded_store();
        let bus = Arc::new(MessageBus::new());
        bus.create_topic("events.miner", 1);
        let sub = bus.subscribe("portfolio", "events.miner").unwrap();

        let replayer = DlqReplayer::new(store.clone(), bus);
        let report = replayer.replay(&DlqFilter::default(), 10, true).await;
        assert_eq!(report.matched, 3);
        assert_eq!(report.replayed, 0);
        assert!(report.dry_run);

        assert_eq!(sub.depth(0), 0);
        assert_eq!(store.read(|t| t.dlq_open_count()), 3);
    }

    #[tokio::test]
    async fn test_replay_republishes_and_stamps() {
        let store = seeded_store();
        let bus = Arc::new(MessageBus::new());
        bus.create_topic("events.miner", 1);
        bus.create_topic("events.crm", 1);
        let sub = bus.subscribe("portfolio", "events.miner").unwrap();
        let _crm = bus.subscribe("crm", "events.crm").unwrap();

        let replayer = DlqReplayer::new(store.clone(), bus);
        let filter = DlqFilter {
            event_kind: Some(EventKind::from("miner.added")),
            ..DlqFilter::default()
        };
        let report = replayer.replay(&filter, 10, false).await;
        assert_eq!(report.replayed, 2);
        assert_eq!(report.failed, 0);

        // Replayed envelopes carry the replayed flag.
        let delivery = sub.next(0).await;
        assert!(delivery.envelope.replayed);
        delivery.ack();

        // Rows remain, stamped, and no longer count as open.
        assert_eq!(store.read(|t| t.dlq_iter().count()), 3);
        assert_eq!(store.read(|t| t.dlq_open_count()), 1);
    }

    #[tokio::test]
    async fn test_replay_respects_limit() {
        let store = seeded_store();
        let bus = Arc::new(MessageBus::new());
        bus.create_topic("events.miner", 1);
        bus.create_topic("events.crm", 1);
        let _sub = bus.subscribe("portfolio", "events.miner").unwrap();
        let _crm = bus.subscribe("crm", "events.crm").unwrap();

        let replayer = DlqReplayer::new(store.clone(), bus);
        let report = replayer.replay(&DlqFilter::default(), 1, false).await;
        assert_eq!(report.matched, 1);
        assert_eq!(report.replayed, 1);
        assert_eq!(store.read(|t| t.dlq_open_count()), 2);
    }
}
