//! The write surface of a transaction.
//!
//! A [`Txn`] wraps the snapshot's tables; mutators enforce unique keys,
//! foreign keys and status-machine rules so no caller can corrupt an
//! invariant without going out of its way. Reads go through `Deref` to
//! [`Tables`].

use crate::error::StoreError;
use crate::rows::*;
use crate::tables::Tables;
use chrono::{DateTime, Utc};
use shared_types::{CommandId, CommandStatus, DeviceId, EventId, KeyId, TenantId};
use std::ops::Deref;
use uuid::Uuid;

/// An in-progress transaction over a snapshot of the tables.
pub struct Txn<'a> {
    pub(crate) tables: &'a mut Tables,
}

impl Deref for Txn<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        self.tables
    }
}

impl Txn<'_> {
    /// Raw table access for store-internal maintenance (retention pruning).
    pub(crate) fn tables_mut(&mut self) -> &mut Tables {
        self.tables
    }

    // ==================== outbox ====================

    /// Insert an outbox row. Fails with `DuplicateKey` when the row carries
    /// an idempotency key that was already used.
    pub fn insert_outbox(&mut self, row: OutboxRow) -> Result<(), StoreError> {
        if let Some(key) = &row.idempotency_key {
            if self.tables.outbox_idem.contains_key(key) {
                return Err(StoreError::DuplicateKey {
                    constraint: "outbox_idempotency_key",
                    key: key.clone(),
                });
            }
            self.tables.outbox_idem.insert(key.clone(), row.id);
        }
        let seq = self.tables.outbox_seq;
        self.tables.outbox_seq += 1;
        self.tables.outbox_by_id.insert(row.id, seq);
        self.tables.outbox.insert(seq, row);
        Ok(())
    }

    /// Stamp `published_at`. The one legal mutation of an outbox row.
    pub fn mark_published(&mut self, id: EventId, when: DateTime<Utc>) -> Result<(), StoreError> {
        let seq = *self
            .tables
            .outbox_by_id
            .get(&id)
            .ok_or(StoreError::NotFound { table: "outbox", key: id.to_string() })?;
        let row = self
            .tables
            .outbox
            .get_mut(&seq)
            .ok_or(StoreError::NotFound { table: "outbox", key: id.to_string() })?;
        if row.published_at.is_none() {
            row.published_at = Some(when);
        }
        Ok(())
    }

    // ==================== inbox ====================

    /// Insert the consumption marker. `DuplicateKey` here is the signal the
    /// event was already processed; the caller commits no-ops.
    pub fn insert_inbox(&mut self, row: InboxRow) -> Result<(), StoreError> {
        let key = (row.consumer_name.clone(), row.event_id);
        if self.tables.inbox.contains_key(&key) {
            return Err(StoreError::DuplicateKey {
                constraint: "inbox_pkey",
                key: format!("{}/{}", row.consumer_name, row.event_id),
            });
        }
        self.tables.inbox.insert(key, row);
        Ok(())
    }

    // ==================== dlq ====================

    /// Park a terminally failed event.
    pub fn insert_dlq(&mut self, row: DlqRow) {
        self.tables.dlq.insert(row.id, row);
    }

    /// Mark a DLQ entry replayed; the row stays for audit.
    pub fn mark_dlq_replayed(&mut self, id: Uuid, when: DateTime<Utc>) -> Result<(), StoreError> {
        let row = self
            .tables
            .dlq
            .get_mut(&id)
            .ok_or(StoreError::NotFound { table: "dlq", key: id.to_string() })?;
        row.replayed = true;
        row.replayed_at = Some(when);
        Ok(())
    }

    /// Drop a DLQ entry by operator decision.
    pub fn remove_dlq(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.tables
            .dlq
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { table: "dlq", key: id.to_string() })
    }

    // ==================== commands ====================

    /// Insert a command row. The caller is expected to have consulted
    /// [`Tables::command_by_idempotency`] first; this re-checks under the
    /// transaction to close the race.
    pub fn insert_command(&mut self, row: CommandRow) -> Result<(), StoreError> {
        if let Some(key) = &row.idempotency_key {
            let idem = (row.tenant_id.clone(), row.requester_id.clone(), key.clone());
            if self.tables.command_idem.contains_key(&idem) {
                return Err(StoreError::DuplicateKey {
                    constraint: "command_idempotency",
                    key: key.clone(),
                });
            }
            self.tables.command_idem.insert(idem, row.id);
        }
        self.tables.commands.insert(row.id, row);
        Ok(())
    }

    /// Transition a command's status, enforcing the forward-only machine.
    pub fn transition_command(
        &mut self,
        id: CommandId,
        next: CommandStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let row = self
            .tables
            .commands
            .get_mut(&id)
            .ok_or(StoreError::NotFound { table: "commands", key: id.to_string() })?;
        if !row.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                table: "commands",
                key: id.to_string(),
                detail: format!("{:?} -> {:?}", row.status, next),
            });
        }
        row.status = next;
        row.updated_at = now;
        Ok(())
    }

    /// Mutate non-status command fields (fetch stamps, approval metadata).
    /// Status changes must go through [`Txn::transition_command`].
    pub fn with_command_mut(
        &mut self,
        id: CommandId,
        f: impl FnOnce(&mut CommandRow),
    ) -> Result<(), StoreError> {
        let row = self
            .tables
            .commands
            .get_mut(&id)
            .ok_or(StoreError::NotFound { table: "commands", key: id.to_string() })?;
        let status_before = row.status;
        f(row);
        debug_assert_eq!(status_before, row.status, "status change outside transition_command");
        Ok(())
    }

    /// Insert or replace the result row for `(command, miner)`.
    pub fn upsert_command_result(&mut self, row: CommandResultRow) -> Result<(), StoreError> {
        if !self.tables.commands.contains_key(&row.command_id) {
            return Err(StoreError::ForeignKey {
                table: "commands",
                key: row.command_id.to_string(),
            });
        }
        if let Some(existing) = self
            .tables
            .command_results
            .iter_mut()
            .find(|r| r.command_id == row.command_id && r.miner_id == row.miner_id)
        {
            *existing = row;
        } else {
            self.tables.command_results.push(row);
        }
        Ok(())
    }

    // ==================== fleet & credentials ====================

    /// Register a collector key (hash only).
    pub fn insert_collector_key(&mut self, row: CollectorKeyRow) -> Result<(), StoreError> {
        if self.tables.keys_by_hash.contains_key(&row.key_hash) {
            return Err(StoreError::DuplicateKey {
                constraint: "collector_key_hash",
                key: row.key_hash.clone(),
            });
        }
        self.tables.keys_by_hash.insert(row.key_hash.clone(), row.id);
        self.tables.collector_keys.insert(row.id, row);
        Ok(())
    }

    /// Revoke a collector key.
    pub fn revoke_collector_key(&mut self, id: KeyId, when: DateTime<Utc>) -> Result<(), StoreError> {
        let row = self
            .tables
            .collector_keys
            .get_mut(&id)
            .ok_or(StoreError::NotFound { table: "collector_keys", key: id.to_string() })?;
        row.revoked_at = Some(when);
        Ok(())
    }

    /// Register an edge device.
    pub fn insert_device(&mut self, row: EdgeDeviceRow) -> Result<(), StoreError> {
        if self.tables.edge_devices.contains_key(&row.id) {
            return Err(StoreError::DuplicateKey {
                constraint: "edge_devices_pkey",
                key: row.id.to_string(),
            });
        }
        self.tables.edge_devices.insert(row.id.clone(), row);
        Ok(())
    }

    /// Stamp a device's `last_seen_at`.
    pub fn touch_device(&mut self, id: &DeviceId, when: DateTime<Utc>) -> Result<(), StoreError> {
        let row = self
            .tables
            .edge_devices
            .get_mut(id)
            .ok_or(StoreError::NotFound { table: "edge_devices", key: id.to_string() })?;
        row.last_seen_at = Some(when);
        Ok(())
    }

    /// Register a miner into a site/tenant scope.
    pub fn insert_miner(&mut self, row: MinerRow) -> Result<(), StoreError> {
        let key = (row.site_id.clone(), row.miner_id.clone());
        if self.tables.miners.contains_key(&key) {
            return Err(StoreError::DuplicateKey {
                constraint: "miners_pkey",
                key: format!("{}/{}", row.site_id, row.miner_id),
            });
        }
        self.tables.miners.insert(key, row);
        Ok(())
    }

    // ==================== telemetry ====================

    /// Upsert the live snapshot for `(site, miner)`.
    pub fn upsert_live(&mut self, row: TelemetryLiveRow) {
        let key = (row.site_id.clone(), row.record.miner_id.clone());
        self.tables.telemetry_live.insert(key, row);
    }

    /// Append one history row. The server stores in arrival order.
    pub fn append_history(&mut self, row: TelemetryHistoryRow) {
        self.tables.telemetry_history.push(row);
    }

    /// Append an upload log row.
    pub fn append_upload_log(&mut self, row: UploadLogRow) {
        self.tables.upload_log.push(row);
    }

    // ==================== audit & read-models ====================

    /// Append an audit row, assigning the next insertion-ordered id.
    /// Hash-chain fields are the caller's responsibility.
    pub fn append_audit(&mut self, mut row: AuditRow) -> u64 {
        let id = self.tables.audit_seq;
        self.tables.audit_seq += 1;
        row.id = id;
        self.tables.audit_log.push(row);
        id
    }

    /// Test support: direct mutable access to the audit rows, for
    /// tamper-injection in chain-verification tests. Production code never
    /// mutates audit rows.
    pub fn audit_rows_raw(&mut self) -> &mut Vec<AuditRow> {
        &mut self.tables.audit_log
    }

    /// Update (or initialize) a tenant's portfolio read-model row.
    pub fn update_portfolio(
        &mut self,
        tenant: &TenantId,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut PortfolioRow),
    ) {
        let row = self
            .tables
            .portfolio
            .entry(tenant.clone())
            .or_insert_with(|| PortfolioRow {
                tenant_id: tenant.clone(),
                miner_count: 0,
                total_hashrate_ghs: 0.0,
                updated_at: now,
            });
        f(row);
        row.updated_at = now;
    }

    /// Replace a tenant's CRM activity read-model row.
    pub fn set_crm_activity(&mut self, row: CrmActivityRow) {
        self.tables.crm_activity.insert(row.tenant_id.clone(), row);
    }
}
