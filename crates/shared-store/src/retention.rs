//! Retention pruning.
//!
//! Windows per the persisted-layout contract: published outbox rows 7 days
//! after publish, inbox 30 days, upload logs 7 days, DLQ 90 days (resolved
//! rows only). Telemetry history retention is operator-controlled and
//! passed in explicitly.

use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

/// Retention windows.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub outbox_published: Duration,
    pub inbox: Duration,
    pub upload_log: Duration,
    pub dlq_resolved: Duration,
    /// `None` keeps telemetry history forever.
    pub telemetry_history: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            outbox_published: Duration::days(7),
            inbox: Duration::days(30),
            upload_log: Duration::days(7),
            dlq_resolved: Duration::days(90),
            telemetry_history: None,
        }
    }
}

/// Rows removed by one pruning pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub outbox: usize,
    pub inbox: usize,
    pub upload_log: usize,
    pub dlq: usize,
    pub telemetry_history: usize,
}

impl PruneReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.outbox + self.inbox + self.upload_log + self.dlq + self.telemetry_history
    }
}

/// Remove rows older than the policy windows. Runs as one transaction.
pub fn prune(store: &Store, policy: &RetentionPolicy, now: DateTime<Utc>) -> PruneReport {
    let outbox_cutoff = now - policy.outbox_published;
    let inbox_cutoff = now - policy.inbox;
    let upload_cutoff = now - policy.upload_log;
    let dlq_cutoff = now - policy.dlq_resolved;
    let history_cutoff = policy.telemetry_history.map(|w| now - w);

    let report = store
        .transact(|txn| {
            let mut report = PruneReport::default();
            let t = txn.tables_mut();

            let before = t.outbox.len();
            let stale: Vec<u64> = t
                .outbox
                .iter()
                .filter(|(_, row)| matches!(row.published_at, Some(p) if p < outbox_cutoff))
                .map(|(seq, _)| *seq)
                .collect();
            for seq in stale {
                if let Some(row) = t.outbox.remove(&seq) {
                    t.outbox_by_id.remove(&row.id);
                    if let Some(key) = row.idempotency_key {
                        t.outbox_idem.remove(&key);
                    }
                }
            }
            report.outbox = before - t.outbox.len();

            let before = t.inbox.len();
            t.inbox.retain(|_, row| row.consumed_at >= inbox_cutoff);
            report.inbox = before - t.inbox.len();

            let before = t.upload_log.len();
            t.upload_log.retain(|row| row.received_at >= upload_cutoff);
            report.upload_log = before - t.upload_log.len();

            let before = t.dlq.len();
            t.dlq
                .retain(|_, row| !(row.replayed && row.last_failed_at < dlq_cutoff));
            report.dlq = before - t.dlq.len();

            if let Some(cutoff) = history_cutoff {
                let before = t.telemetry_history.len();
                t.telemetry_history.retain(|row| row.timestamp >= cutoff);
                report.telemetry_history = before - t.telemetry_history.len();
            }

            Ok(report)
        })
        .unwrap_or_default();

    if report.total() > 0 {
        info!(
            outbox = report.outbox,
            inbox = report.inbox,
            upload_log = report.upload_log,
            dlq = report.dlq,
            history = report.telemetry_history,
            "Retention prune removed rows"
        );
    }
    report
}
