//! The table set and its read surface.
//!
//! Collections double as their own primary-key indexes; secondary unique
//! indexes (outbox idempotency, command idempotency, key hashes) are kept
//! alongside and maintained by the [`crate::Txn`] mutators.

use crate::rows::*;
use chrono::{DateTime, Utc};
use shared_types::{CommandId, CommandStatus, DeviceId, EventId, KeyId, MinerId, SiteId, TenantId};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Every durable table, in one cloneable unit.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    // ==================== event backbone ====================
    pub(crate) outbox_seq: u64,
    pub(crate) outbox: BTreeMap<u64, OutboxRow>,
    pub(crate) outbox_by_id: HashMap<EventId, u64>,
    pub(crate) outbox_idem: HashMap<String, EventId>,
    pub(crate) inbox: BTreeMap<(String, EventId), InboxRow>,
    pub(crate) dlq: BTreeMap<Uuid, DlqRow>,

    // ==================== command plane ====================
    pub(crate) commands: HashMap<CommandId, CommandRow>,
    pub(crate) command_idem: HashMap<(TenantId, String, String), CommandId>,
    pub(crate) command_results: Vec<CommandResultRow>,

    // ==================== fleet & credentials ====================
    pub(crate) collector_keys: HashMap<KeyId, CollectorKeyRow>,
    pub(crate) keys_by_hash: HashMap<String, KeyId>,
    pub(crate) edge_devices: HashMap<DeviceId, EdgeDeviceRow>,
    pub(crate) miners: BTreeMap<(SiteId, MinerId), MinerRow>,

    // ==================== telemetry ====================
    pub(crate) telemetry_live: BTreeMap<(SiteId, MinerId), TelemetryLiveRow>,
    pub(crate) telemetry_history: Vec<TelemetryHistoryRow>,
    pub(crate) upload_log: Vec<UploadLogRow>,

    // ==================== audit & read-models ====================
    pub(crate) audit_seq: u64,
    pub(crate) audit_log: Vec<AuditRow>,
    pub(crate) portfolio: HashMap<TenantId, PortfolioRow>,
    pub(crate) crm_activity: HashMap<TenantId, CrmActivityRow>,
}

impl Tables {
    // ==================== outbox ====================

    /// Unpublished outbox rows in insertion (= `created_at`) order.
    #[must_use]
    pub fn outbox_unpublished(&self, limit: usize) -> Vec<OutboxRow> {
        self.outbox
            .values()
            .filter(|row| row.published_at.is_none())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Look up an outbox row by event id.
    #[must_use]
    pub fn outbox_get(&self, id: EventId) -> Option<&OutboxRow> {
        self.outbox_by_id.get(&id).and_then(|seq| self.outbox.get(seq))
    }

    /// Count of unpublished rows and age of the oldest one.
    #[must_use]
    pub fn outbox_backlog(&self, now: DateTime<Utc>) -> (usize, Option<chrono::Duration>) {
        let mut count = 0usize;
        let mut oldest: Option<DateTime<Utc>> = None;
        for row in self.outbox.values() {
            if row.published_at.is_none() {
                count += 1;
                if oldest.is_none() {
                    oldest = Some(row.created_at);
                }
            }
        }
        (count, oldest.map(|t| now - t))
    }

    /// Total outbox rows, published or not.
    #[must_use]
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    // ==================== inbox ====================

    /// Whether `(consumer, event)` was already processed.
    #[must_use]
    pub fn inbox_contains(&self, consumer: &str, event: EventId) -> bool {
        self.inbox.contains_key(&(consumer.to_string(), event))
    }

    /// Inbox row lookup.
    #[must_use]
    pub fn inbox_get(&self, consumer: &str, event: EventId) -> Option<&InboxRow> {
        self.inbox.get(&(consumer.to_string(), event))
    }

    /// Total inbox rows across consumers.
    #[must_use]
    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    /// Inbox rows for one consumer, insertion order not guaranteed.
    pub fn inbox_for(&self, consumer: &str) -> impl Iterator<Item = &InboxRow> {
        let consumer = consumer.to_string();
        self.inbox
            .iter()
            .filter(move |((c, _), _)| *c == consumer)
            .map(|(_, row)| row)
    }

    // ==================== dlq ====================

    /// All DLQ rows.
    pub fn dlq_iter(&self) -> impl Iterator<Item = &DlqRow> {
        self.dlq.values()
    }

    /// DLQ row lookup.
    #[must_use]
    pub fn dlq_get(&self, id: Uuid) -> Option<&DlqRow> {
        self.dlq.get(&id)
    }

    /// Count of unreplayed DLQ rows.
    #[must_use]
    pub fn dlq_open_count(&self) -> usize {
        self.dlq.values().filter(|r| !r.replayed).count()
    }

    // ==================== commands ====================

    /// Command lookup.
    #[must_use]
    pub fn command(&self, id: CommandId) -> Option<&CommandRow> {
        self.commands.get(&id)
    }

    /// Find a prior command by its creation idempotency key.
    #[must_use]
    pub fn command_by_idempotency(
        &self,
        tenant: &TenantId,
        requester: &str,
        key: &str,
    ) -> Option<&CommandRow> {
        self.command_idem
            .get(&(tenant.clone(), requester.to_string(), key.to_string()))
            .and_then(|id| self.commands.get(id))
    }

    /// Find the command owning a dispatch nonce.
    #[must_use]
    pub fn command_by_nonce(&self, nonce: Uuid) -> Option<&CommandRow> {
        self.commands.values().find(|c| c.dispatch_nonce == nonce)
    }

    /// Queued, unexpired commands for a site, highest priority first then
    /// oldest first.
    #[must_use]
    pub fn queued_commands_for_site(&self, site: &SiteId, now: DateTime<Utc>) -> Vec<&CommandRow> {
        let mut rows: Vec<&CommandRow> = self
            .commands
            .values()
            .filter(|c| c.site_id == *site && c.status == CommandStatus::Queued && c.expires_at > now)
            .collect();
        rows.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        rows
    }

    /// All commands, unordered.
    pub fn commands_iter(&self) -> impl Iterator<Item = &CommandRow> {
        self.commands.values()
    }

    /// Per-target results for one command.
    #[must_use]
    pub fn results_for(&self, command: CommandId) -> Vec<&CommandResultRow> {
        self.command_results
            .iter()
            .filter(|r| r.command_id == command)
            .collect()
    }

    // ==================== fleet & credentials ====================

    /// Look up an active-or-revoked collector key by its hash.
    #[must_use]
    pub fn collector_key_by_hash(&self, hash: &str) -> Option<&CollectorKeyRow> {
        self.keys_by_hash.get(hash).and_then(|id| self.collector_keys.get(id))
    }

    /// Collector key lookup by id.
    #[must_use]
    pub fn collector_key(&self, id: KeyId) -> Option<&CollectorKeyRow> {
        self.collector_keys.get(&id)
    }

    /// Keys registered for a site, oldest first, revoked included.
    #[must_use]
    pub fn collector_keys_for_site(&self, site: &SiteId) -> Vec<&CollectorKeyRow> {
        let mut rows: Vec<&CollectorKeyRow> = self
            .collector_keys
            .values()
            .filter(|k| k.site_id == *site)
            .collect();
        rows.sort_by_key(|k| k.created_at);
        rows
    }

    /// Upload log rows for a site, newest first.
    #[must_use]
    pub fn upload_log_for_site(&self, site: &SiteId, limit: usize) -> Vec<&UploadLogRow> {
        self.upload_log
            .iter()
            .rev()
            .filter(|row| row.site_id == *site)
            .take(limit)
            .collect()
    }

    /// Edge device lookup.
    #[must_use]
    pub fn device(&self, id: &DeviceId) -> Option<&EdgeDeviceRow> {
        self.edge_devices.get(id)
    }

    /// First active (unrevoked) edge device registered for a site. Command
    /// signing keys derive from this device's secret.
    #[must_use]
    pub fn active_device_for_site(&self, site: &SiteId) -> Option<&EdgeDeviceRow> {
        let mut devices: Vec<&EdgeDeviceRow> = self
            .edge_devices
            .values()
            .filter(|d| d.site_id == *site && d.revoked_at.is_none())
            .collect();
        devices.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        devices.first().copied()
    }

    /// Miner registry lookup.
    #[must_use]
    pub fn miner(&self, site: &SiteId, miner: &MinerId) -> Option<&MinerRow> {
        self.miners.get(&(site.clone(), miner.clone()))
    }

    /// Registered miners for a tenant.
    pub fn miners_for_tenant(&self, tenant: &TenantId) -> impl Iterator<Item = &MinerRow> {
        let tenant = tenant.clone();
        self.miners.values().filter(move |m| m.tenant_id == tenant)
    }

    // ==================== telemetry ====================

    /// Live snapshot lookup.
    #[must_use]
    pub fn live(&self, site: &SiteId, miner: &MinerId) -> Option<&TelemetryLiveRow> {
        self.telemetry_live.get(&(site.clone(), miner.clone()))
    }

    /// All live snapshots.
    pub fn live_iter(&self) -> impl Iterator<Item = &TelemetryLiveRow> {
        self.telemetry_live.values()
    }

    /// Appended history rows, oldest first.
    #[must_use]
    pub fn history(&self) -> &[TelemetryHistoryRow] {
        &self.telemetry_history
    }

    /// Upload log, oldest first.
    #[must_use]
    pub fn upload_log(&self) -> &[UploadLogRow] {
        &self.upload_log
    }

    // ==================== audit & read-models ====================

    /// Audit rows for a tenant in insertion order.
    #[must_use]
    pub fn audit_rows_for(&self, tenant: &TenantId) -> Vec<&AuditRow> {
        self.audit_log
            .iter()
            .filter(|row| row.tenant_id == *tenant)
            .collect()
    }

    /// `self_hash` of a tenant's most recent audit row, if any.
    #[must_use]
    pub fn last_audit_hash(&self, tenant: &TenantId) -> Option<[u8; 32]> {
        self.audit_log
            .iter()
            .rev()
            .find(|row| row.tenant_id == *tenant)
            .map(|row| row.self_hash)
    }

    /// Total audit rows across tenants.
    #[must_use]
    pub fn audit_len(&self) -> usize {
        self.audit_log.len()
    }

    /// Derived portfolio row for a tenant.
    #[must_use]
    pub fn portfolio(&self, tenant: &TenantId) -> Option<&PortfolioRow> {
        self.portfolio.get(tenant)
    }

    /// Derived CRM activity row for a tenant.
    #[must_use]
    pub fn crm_activity(&self, tenant: &TenantId) -> Option<&CrmActivityRow> {
        self.crm_activity.get(tenant)
    }

    /// Most recent `updated_at` across derived rows; drives the freshness
    /// health probe.
    #[must_use]
    pub fn derived_freshness(&self) -> Option<DateTime<Utc>> {
        let p = self.portfolio.values().map(|r| r.updated_at).max();
        let c = self.crm_activity.values().map(|r| r.updated_at).max();
        p.into_iter().chain(c).max()
    }
}
