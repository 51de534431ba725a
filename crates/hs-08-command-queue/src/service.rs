//! The command service: creation, approval, fetch, results, sweeping.

use crate::nonce::TerminalNonceCache;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use hs_10_audit_chain::AuditEvent;
use hs_telemetry::metrics::COMMAND_TRANSITIONS;
use parking_lot::Mutex;
use shared_store::{append_event, CommandResultRow, CommandRow, Store, StoreError};
use shared_types::config::CommandConfig;
use shared_types::signing::{derive_signing_key, sign_command, verify_command_signature};
use shared_types::{
    Actor, CommandId, CommandResultReport, CommandResultStatus, CommandSpec, CommandStatus,
    CoreError, DeviceId, EventKind, PendingCommand, SiteId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of a create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOutcome {
    pub id: CommandId,
    /// True when an existing row was returned for the idempotency key.
    pub deduped: bool,
}

/// Rows touched by one sweeper pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub reverted: usize,
    pub failed: usize,
}

/// The command queue service.
pub struct CommandService {
    store: Store,
    config: CommandConfig,
    site_wakeups: DashMap<SiteId, Arc<Notify>>,
    terminal_nonces: Mutex<TerminalNonceCache>,
}

impl CommandService {
    /// Build the service.
    #[must_use]
    pub fn new(store: Store, config: CommandConfig) -> Self {
        Self {
            store,
            config,
            site_wakeups: DashMap::new(),
            terminal_nonces: Mutex::new(TerminalNonceCache::new()),
        }
    }

    fn wakeup(&self, site: &SiteId) -> Arc<Notify> {
        self.site_wakeups
            .entry(site.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Create (or dedupe) a command.
    ///
    /// Inserts the row with a fresh dispatch nonce and an HMAC signature
    /// over the dispatch fields, derived from the site device's secret.
    /// A duplicate `(tenant, requester, idempotency_key)` returns the
    /// existing row's id without side effects.
    pub fn create(&self, spec: &CommandSpec, actor: &Actor) -> Result<CreateOutcome, CoreError> {
        if spec.target_ids.is_empty() {
            return Err(CoreError::Validation {
                field: "target_ids".into(),
                detail: "at least one target required".into(),
            });
        }

        let outcome = self
            .store
            .transact(|txn| {
                if let Some(key) = &spec.idempotency_key {
                    if let Some(existing) =
                        txn.command_by_idempotency(&spec.tenant_id, &spec.requester_id, key)
                    {
                        return Ok(CreateOutcome { id: existing.id, deduped: true });
                    }
                }

                let device = txn
                    .active_device_for_site(&spec.site_id)
                    .ok_or_else(|| {
                        StoreError::Aborted(CoreError::Validation {
                            field: "site_id".into(),
                            detail: format!("no registered edge device for site {}", spec.site_id),
                        })
                    })?
                    .clone();

                let now = Utc::now();
                let ttl = spec
                    .ttl_minutes
                    .map_or(self.config.default_ttl, ChronoDuration::minutes);
                let expires_at = now + ttl;

                let id = CommandId::new();
                let dispatch_nonce = Uuid::new_v4();
                let command_type = spec.command_type.canonical();
                let signing_key = derive_signing_key(&device.hmac_secret);
                let signature =
                    sign_command(&signing_key, id, dispatch_nonce, expires_at, &spec.payload);

                let status = if spec.require_approval {
                    CommandStatus::PendingApproval
                } else {
                    CommandStatus::Queued
                };

                txn.insert_command(CommandRow {
                    id,
                    tenant_id: spec.tenant_id.clone(),
                    site_id: spec.site_id.clone(),
                    requester_id: spec.requester_id.clone(),
                    command_type,
                    target_scope: spec.target_scope,
                    target_ids: spec.target_ids.clone(),
                    payload: spec.payload.clone(),
                    status,
                    priority: spec.priority,
                    require_approval: spec.require_approval,
                    approved_by: None,
                    approved_at: None,
                    idempotency_key: spec.idempotency_key.clone(),
                    dispatch_nonce,
                    signature,
                    fetched_by: None,
                    fetched_at: None,
                    fetch_count: 0,
                    expires_at,
                    created_at: now,
                    updated_at: now,
                })?;

                hs_10_audit_chain::record(
                    txn,
                    &AuditEvent {
                        tenant_id: spec.tenant_id.clone(),
                        actor_id: actor.id.clone(),
                        event_type: "command.created".into(),
                        target_type: "command".into(),
                        target_id: id.to_string(),
                        detail: serde_json::json!({
                            "command_type": command_type.as_str(),
                            "targets": spec.target_ids.len(),
                            "require_approval": spec.require_approval,
                        }),
                    },
                )?;

                Ok(CreateOutcome { id, deduped: false })
            })
            .map_err(|err| err.to_core())?;

        if !outcome.deduped {
            COMMAND_TRANSITIONS
                .with_label_values(&[if spec.require_approval {
                    "pending_approval"
                } else {
                    "queued"
                }])
                .inc();
            self.wakeup(&spec.site_id).notify_waiters();
            info!(command_id = %outcome.id, site = %spec.site_id, "Command created");
        }
        Ok(outcome)
    }

    /// Approve a `pending_approval` command into the queue.
    pub fn approve(&self, id: CommandId, actor: &Actor) -> Result<(), CoreError> {
        let site = self
            .store
            .transact(|txn| {
                let row = txn
                    .command(id)
                    .ok_or(StoreError::NotFound { table: "commands", key: id.to_string() })?
                    .clone();
                txn.transition_command(id, CommandStatus::Queued, Utc::now())?;
                txn.with_command_mut(id, |cmd| {
                    cmd.approved_by = Some(actor.id.clone());
                    cmd.approved_at = Some(Utc::now());
                })?;
                hs_10_audit_chain::record(
                    txn,
                    &AuditEvent {
                        tenant_id: row.tenant_id.clone(),
                        actor_id: actor.id.clone(),
                        event_type: "command.approved".into(),
                        target_type: "command".into(),
                        target_id: id.to_string(),
                        detail: serde_json::json!({}),
                    },
                )?;
                Ok(row.site_id)
            })
            .map_err(|err| err.to_core())?;

        COMMAND_TRANSITIONS.with_label_values(&["queued"]).inc();
        self.wakeup(&site).notify_waiters();
        Ok(())
    }

    /// Cancel a not-yet-running command.
    pub fn cancel(&self, id: CommandId, actor: &Actor) -> Result<(), CoreError> {
        self.store
            .transact(|txn| {
                let row = txn
                    .command(id)
                    .ok_or(StoreError::NotFound { table: "commands", key: id.to_string() })?
                    .clone();
                txn.transition_command(id, CommandStatus::Cancelled, Utc::now())?;
                hs_10_audit_chain::record(
                    txn,
                    &AuditEvent {
                        tenant_id: row.tenant_id,
                        actor_id: actor.id.clone(),
                        event_type: "command.cancelled".into(),
                        target_type: "command".into(),
                        target_id: id.to_string(),
                        detail: serde_json::json!({}),
                    },
                )?;
                Ok(())
            })
            .map_err(|err| err.to_core())?;
        COMMAND_TRANSITIONS.with_label_values(&["cancelled"]).inc();
        Ok(())
    }

    /// Long-poll fetch for an edge device.
    ///
    /// Returns up to `fetch_limit` queued, unexpired commands for the site,
    /// transitioned to `running` and stamped with the device. Blocks until
    /// commands are available, `max_wait` elapses, or the caller drops the
    /// future.
    pub async fn fetch_pending(
        &self,
        site: &SiteId,
        device: &DeviceId,
        max_wait: Duration,
    ) -> Result<Vec<PendingCommand>, CoreError> {
        let deadline = tokio::time::Instant::now() + max_wait;
        let wakeup = self.wakeup(site);

        loop {
            let batch = self.take_queued(site, device).map_err(|err| err.to_core())?;
            if !batch.is_empty() {
                debug!(site = %site, device = %device, count = batch.len(), "Commands fetched");
                return Ok(batch);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::select! {
                () = wakeup.notified() => {}
                () = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    fn take_queued(
        &self,
        site: &SiteId,
        device: &DeviceId,
    ) -> Result<Vec<PendingCommand>, StoreError> {
        let fetch_limit = self.config.fetch_limit;
        self.store.transact(|txn| {
            let dev = txn
                .device(device)
                .ok_or(StoreError::Aborted(CoreError::Unauthorized))?;
            if dev.site_id != *site || dev.revoked_at.is_some() {
                return Err(StoreError::Aborted(CoreError::Unauthorized));
            }

            let now = Utc::now();
            let ids: Vec<CommandId> = txn
                .queued_commands_for_site(site, now)
                .into_iter()
                .take(fetch_limit)
                .map(|c| c.id)
                .collect();

            let mut batch = Vec::with_capacity(ids.len());
            for id in ids {
                txn.transition_command(id, CommandStatus::Running, now)?;
                txn.with_command_mut(id, |cmd| {
                    cmd.fetched_by = Some(device.clone());
                    cmd.fetched_at = Some(now);
                    cmd.fetch_count += 1;
                })?;
                let row = txn
                    .command(id)
                    .ok_or(StoreError::NotFound { table: "commands", key: id.to_string() })?;
                batch.push(PendingCommand {
                    id: row.id,
                    command_type: row.command_type,
                    target_ids: row.target_ids.clone(),
                    payload: row.payload.clone(),
                    dispatch_nonce: row.dispatch_nonce,
                    expires_at: row.expires_at,
                    signature: row.signature.clone(),
                });
            }
            txn.touch_device(device, now)?;
            Ok(batch)
        })
    }

    /// Record the edge's result report and reconcile the parent status.
    ///
    /// Rejections: unknown command (404), nonce mismatch or already-terminal
    /// nonce (409 replay), bad signature echo or foreign device (403),
    /// results for miners outside the target list (400).
    pub fn report_result(
        &self,
        id: CommandId,
        device: &DeviceId,
        report: &CommandResultReport,
    ) -> Result<CommandStatus, CoreError> {
        if self.terminal_nonces.lock().contains(&report.dispatch_nonce) {
            return Err(CoreError::Conflict("dispatch nonce already terminal".into()));
        }

        let (status, nonce) = self
            .store
            .transact(|txn| {
                let row = txn
                    .command(id)
                    .ok_or(StoreError::NotFound { table: "commands", key: id.to_string() })?
                    .clone();

                if row.dispatch_nonce != report.dispatch_nonce {
                    return Err(StoreError::Aborted(CoreError::Conflict(
                        "dispatch nonce mismatch".into(),
                    )));
                }
                if row.status.is_terminal() {
                    return Err(StoreError::Aborted(CoreError::Conflict(
                        "command already terminal".into(),
                    )));
                }

                let dev = txn
                    .device(device)
                    .ok_or(StoreError::Aborted(CoreError::Unauthorized))?;
                if dev.site_id != row.site_id || dev.revoked_at.is_some() {
                    return Err(StoreError::Aborted(CoreError::Unauthorized));
                }
                let signing_key = derive_signing_key(&dev.hmac_secret);
                if !verify_command_signature(
                    &signing_key,
                    row.id,
                    row.dispatch_nonce,
                    row.expires_at,
                    &row.payload,
                    &report.signature,
                ) {
                    return Err(StoreError::Aborted(CoreError::Forbidden(
                        "command signature rejected".into(),
                    )));
                }

                let now = Utc::now();
                for entry in &report.results {
                    if !row.target_ids.contains(&entry.miner_id) {
                        return Err(StoreError::Aborted(CoreError::Validation {
                            field: "results".into(),
                            detail: format!("miner {} is not a target", entry.miner_id),
                        }));
                    }
                    txn.upsert_command_result(CommandResultRow {
                        id: Uuid::new_v4(),
                        command_id: id,
                        edge_device_id: device.clone(),
                        miner_id: entry.miner_id.clone(),
                        started_at: entry.started_at,
                        finished_at: entry.finished_at,
                        result_status: entry.status,
                        result_message: entry.message.clone(),
                        metrics: entry.metrics.clone(),
                    })?;
                }

                // Aggregate: all targets terminal decides the parent.
                let results: Vec<(String, CommandResultStatus)> = txn
                    .results_for(id)
                    .into_iter()
                    .map(|r| (r.miner_id.clone(), r.result_status))
                    .collect();
                let terminal_for = |target: &String| {
                    results
                        .iter()
                        .find(|(miner, _)| miner == target)
                        .map(|(_, status)| *status)
                        .filter(CommandResultStatus::is_terminal)
                };
                let all_terminal = row.target_ids.iter().all(|t| terminal_for(t).is_some());

                let status = if all_terminal {
                    let all_ok = row
                        .target_ids
                        .iter()
                        .all(|t| terminal_for(t) == Some(CommandResultStatus::Succeeded));
                    let next = if all_ok {
                        CommandStatus::Succeeded
                    } else {
                        CommandStatus::Failed
                    };
                    txn.transition_command(id, next, now)?;
                    hs_10_audit_chain::record(
                        txn,
                        &AuditEvent {
                            tenant_id: row.tenant_id.clone(),
                            actor_id: format!("device:{device}"),
                            event_type: "command.completed".into(),
                            target_type: "command".into(),
                            target_id: id.to_string(),
                            detail: serde_json::json!({ "status": next }),
                        },
                    )?;
                    append_event(
                        txn,
                        EventKind::from("ops.command_completed"),
                        row.tenant_id.clone(),
                        Some(id.to_string()),
                        serde_json::json!({
                            "command_id": id,
                            "command_type": row.command_type.as_str(),
                            "status": next,
                        }),
                        None,
                    )?;
                    next
                } else {
                    CommandStatus::Running
                };
                txn.touch_device(device, now)?;
                Ok((status, row.dispatch_nonce))
            })
            .map_err(|err| err.to_core())?;

        if status.is_terminal() {
            self.terminal_nonces.lock().insert(nonce);
            COMMAND_TRANSITIONS
                .with_label_values(&[match status {
                    CommandStatus::Succeeded => "succeeded",
                    CommandStatus::Failed => "failed",
                    _ => "other",
                }])
                .inc();
            info!(command_id = %id, ?status, "Command reconciled");
        }
        Ok(status)
    }

    /// One sweeper pass: expire overdue rows, revert stuck running rows.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let max_refetch = self.config.max_refetch;
        let timeout_factor = self.config.running_timeout_factor;

        let (report, reverted_sites) = self
            .store
            .transact(|txn| {
                let mut report = SweepReport::default();
                let mut reverted_sites: Vec<SiteId> = Vec::new();

                let rows: Vec<CommandRow> = txn.commands_iter().cloned().collect();
                for row in rows {
                    match row.status {
                        CommandStatus::Queued | CommandStatus::PendingApproval
                            if row.expires_at <= now =>
                        {
                            txn.transition_command(row.id, CommandStatus::Expired, now)?;
                            report.expired += 1;
                        }
                        CommandStatus::Running => {
                            let ttl = row.expires_at - row.created_at;
                            let running_deadline = row
                                .fetched_at
                                .unwrap_or(row.created_at)
                                + ttl * timeout_factor;

                            if row.expires_at <= now {
                                // Past its own TTL: partial results fail it,
                                // a silent run expires.
                                let has_results = !txn.results_for(row.id).is_empty();
                                let next = if has_results {
                                    CommandStatus::Failed
                                } else {
                                    CommandStatus::Expired
                                };
                                txn.transition_command(row.id, next, now)?;
                                if next == CommandStatus::Failed {
                                    report.failed += 1;
                                } else {
                                    report.expired += 1;
                                }
                            } else if running_deadline <= now {
                                if row.fetch_count < max_refetch {
                                    txn.transition_command(row.id, CommandStatus::Queued, now)?;
                                    reverted_sites.push(row.site_id.clone());
                                    report.reverted += 1;
                                } else {
                                    txn.transition_command(row.id, CommandStatus::Failed, now)?;
                                    report.failed += 1;
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Ok((report, reverted_sites))
            })
            .unwrap_or_else(|err| {
                warn!(%err, "Command sweep failed");
                (SweepReport::default(), Vec::new())
            });

        for site in reverted_sites {
            self.wakeup(&site).notify_waiters();
        }
        if report != SweepReport::default() {
            info!(
                expired = report.expired,
                reverted = report.reverted,
                failed = report.failed,
                "Command sweep"
            );
        }
        report
    }

    /// Spawn the periodic sweeper.
    #[must_use]
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let service = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        service.sweep(Utc::now());
                    }
                }
            }
        });
        SweeperHandle { shutdown: shutdown_tx, task }
    }
}

/// Handle to the running sweeper task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_store::EdgeDeviceRow;
    use shared_types::{CommandType, MinerResultEntry, TargetScope, TenantId};

    const DEVICE_SECRET: &[u8] = b"edge-device-secret";

    fn seeded() -> (CommandService, Store) {
        let store = Store::new();
        store
            .transact(|txn| {
                txn.insert_device(EdgeDeviceRow {
                    id: DeviceId::from("edge-1"),
                    site_id: SiteId::from("S1"),
                    name: "rack-a".into(),
                    hmac_secret: DEVICE_SECRET.to_vec(),
                    registered_at: Utc::now(),
                    revoked_at: None,
                    last_seen_at: None,
                })
            })
            .unwrap();
        (CommandService::new(store.clone(), CommandConfig::default()), store)
    }

    fn spec(idempotency_key: Option<&str>) -> CommandSpec {
        CommandSpec {
            tenant_id: TenantId::from("T1"),
            site_id: SiteId::from("S1"),
            requester_id: "u1".into(),
            command_type: CommandType::Restart,
            target_scope: TargetScope::Miner,
            target_ids: vec!["M1".into(), "M2".into()],
            payload: serde_json::json!({"delay_s": 0}),
            idempotency_key: idempotency_key.map(str::to_string),
            ttl_minutes: Some(5),
            require_approval: false,
            priority: 0,
        }
    }

    fn actor() -> Actor {
        Actor::user("u1", TenantId::from("T1"))
    }

    fn entry(miner: &str, status: CommandResultStatus) -> MinerResultEntry {
        MinerResultEntry {
            miner_id: miner.into(),
            status,
            message: None,
            metrics: serde_json::json!({}),
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_and_signs() {
        let (service, store) = seeded();
        let outcome = service.create(&spec(None), &actor()).unwrap();
        assert!(!outcome.deduped);

        store.read(|t| {
            let row = t.command(outcome.id).unwrap();
            // restart normalized to reboot at creation
            assert_eq!(row.command_type, CommandType::Reboot);
            assert_eq!(row.status, CommandStatus::Queued);
            assert_eq!(row.signature.len(), 64);

            let key = derive_signing_key(DEVICE_SECRET);
            assert!(verify_command_signature(
                &key,
                row.id,
                row.dispatch_nonce,
                row.expires_at,
                &row.payload,
                &row.signature
            ));
            // creation is audited
            assert_eq!(t.audit_rows_for(&TenantId::from("T1")).len(), 1);
        });
    }

    #[tokio::test]
    async fn test_idempotent_create_returns_same_id() {
        let (service, store) = seeded();
        let first = service.create(&spec(Some("req-1")), &actor()).unwrap();
        let second = service.create(&spec(Some("req-1")), &actor()).unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.deduped);
        assert_eq!(store.read(|t| t.commands_iter().count()), 1);
    }

    #[tokio::test]
    async fn test_approval_flow() {
        let (service, store) = seeded();
        let mut s = spec(None);
        s.require_approval = true;
        let outcome = service.create(&s, &actor()).unwrap();
        assert_eq!(
            store.read(|t| t.command(outcome.id).unwrap().status),
            CommandStatus::PendingApproval
        );

        // Unfetchable until approved.
        let fetched = service
            .fetch_pending(&SiteId::from("S1"), &DeviceId::from("edge-1"), Duration::ZERO)
            .await
            .unwrap();
        assert!(fetched.is_empty());

        service.approve(outcome.id, &Actor::operator("ops")).unwrap();
        let fetched = service
            .fetch_pending(&SiteId::from("S1"), &DeviceId::from("edge-1"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_marks_running_and_stamps_device() {
        let (service, store) = seeded();
        let outcome = service.create(&spec(None), &actor()).unwrap();

        let fetched = service
            .fetch_pending(&SiteId::from("S1"), &DeviceId::from("edge-1"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, outcome.id);

        store.read(|t| {
            let row = t.command(outcome.id).unwrap();
            assert_eq!(row.status, CommandStatus::Running);
            assert_eq!(row.fetched_by, Some(DeviceId::from("edge-1")));
            assert_eq!(row.fetch_count, 1);
        });

        // A second fetch returns nothing; the command is running.
        let again = service
            .fetch_pending(&SiteId::from("S1"), &DeviceId::from("edge-1"), Duration::ZERO)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_unknown_device_unauthorized() {
        let (service, _store) = seeded();
        let err = service
            .fetch_pending(&SiteId::from("S1"), &DeviceId::from("rogue"), Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::Unauthorized);
    }

    #[tokio::test]
    async fn test_result_aggregation_any_failure_fails_parent() {
        let (service, store) = seeded();
        let outcome = service.create(&spec(None), &actor()).unwrap();
        let fetched = service
            .fetch_pending(&SiteId::from("S1"), &DeviceId::from("edge-1"), Duration::ZERO)
            .await
            .unwrap();
        let cmd = &fetched[0];

        // Partial report: M1 succeeded. Parent stays running.
        let partial = CommandResultReport {
            dispatch_nonce: cmd.dispatch_nonce,
            signature: cmd.signature.clone(),
            results: vec![entry("M1", CommandResultStatus::Succeeded)],
        };
        let status = service
            .report_result(outcome.id, &DeviceId::from("edge-1"), &partial)
            .unwrap();
        assert_eq!(status, CommandStatus::Running);

        // Final report: M2 failed. Parent fails.
        let fin = CommandResultReport {
            dispatch_nonce: cmd.dispatch_nonce,
            signature: cmd.signature.clone(),
            results: vec![entry("M2", CommandResultStatus::Failed)],
        };
        let status = service
            .report_result(outcome.id, &DeviceId::from("edge-1"), &fin)
            .unwrap();
        assert_eq!(status, CommandStatus::Failed);

        store.read(|t| {
            assert_eq!(t.results_for(outcome.id).len(), 2);
            // completion appended an ops event to the outbox
            assert_eq!(t.outbox_len(), 1);
            // create + complete audited
            assert_eq!(t.audit_rows_for(&TenantId::from("T1")).len(), 2);
        });
    }

    #[tokio::test]
    async fn test_replayed_result_rejected() {
        let (service, _store) = seeded();
        let outcome = service.create(&spec(None), &actor()).unwrap();
        let fetched = service
            .fetch_pending(&SiteId::from("S1"), &DeviceId::from("edge-1"), Duration::ZERO)
            .await
            .unwrap();
        let cmd = &fetched[0];

        let report = CommandResultReport {
            dispatch_nonce: cmd.dispatch_nonce,
            signature: cmd.signature.clone(),
            results: vec![
                entry("M1", CommandResultStatus::Succeeded),
                entry("M2", CommandResultStatus::Succeeded),
            ],
        };
        let status = service
            .report_result(outcome.id, &DeviceId::from("edge-1"), &report)
            .unwrap();
        assert_eq!(status, CommandStatus::Succeeded);

        // Echoing the terminal nonce again is a replay.
        let err = service
            .report_result(outcome.id, &DeviceId::from("edge-1"), &report)
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_tampered_signature_rejected() {
        let (service, _store) = seeded();
        let outcome = service.create(&spec(None), &actor()).unwrap();
        let fetched = service
            .fetch_pending(&SiteId::from("S1"), &DeviceId::from("edge-1"), Duration::ZERO)
            .await
            .unwrap();
        let cmd = &fetched[0];

        let mut bad_signature = cmd.signature.clone();
        // Flip the last hex digit.
        let last = bad_signature.pop().unwrap();
        bad_signature.push(if last == '0' { '1' } else { '0' });

        let report = CommandResultReport {
            dispatch_nonce: cmd.dispatch_nonce,
            signature: bad_signature,
            results: vec![entry("M1", CommandResultStatus::Succeeded)],
        };
        let err = service
            .report_result(outcome.id, &DeviceId::from("edge-1"), &report)
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_sweeper_expires_overdue() {
        let (service, store) = seeded();
        let mut s = spec(None);
        s.ttl_minutes = Some(1);
        let outcome = service.create(&s, &actor()).unwrap();

        let report = service.sweep(Utc::now() + ChronoDuration::minutes(2));
        assert_eq!(report.expired, 1);
        assert_eq!(
            store.read(|t| t.command(outcome.id).unwrap().status),
            CommandStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_sweeper_reverts_stuck_running() {
        let (service, store) = seeded();
        let mut s = spec(None);
        s.ttl_minutes = Some(10);
        let outcome = service.create(&s, &actor()).unwrap();
        service
            .fetch_pending(&SiteId::from("S1"), &DeviceId::from("edge-1"), Duration::ZERO)
            .await
            .unwrap();

        // Backdate the fetch far past the running timeout (5 x ttl) while
        // keeping the command itself unexpired.
        store
            .transact(|txn| {
                txn.with_command_mut(outcome.id, |cmd| {
                    cmd.fetched_at = Some(Utc::now() - ChronoDuration::minutes(55));
                    cmd.expires_at = Utc::now() + ChronoDuration::minutes(10);
                })
            })
            .unwrap();

        let report = service.sweep(Utc::now());
        assert_eq!(report.reverted, 1);
        assert_eq!(
            store.read(|t| t.command(outcome.id).unwrap().status),
            CommandStatus::Queued
        );
    }
}
