//! # Audit Hash Chain
//!
//! Every sensitive action (key issuance/rotation, device registration and
//! revocation, command approval, DLQ replay) appends a row to the audit log.
//! Rows for one tenant form a hash chain:
//!
//! ```text
//! payload_digest_N = SHA-256(canonical_json(event))
//! previous_hash_N  = self_hash_{N-1}        (zeros for N = 0)
//! self_hash_N      = SHA-256(previous_hash_N ‖ payload_digest_N
//!                            ‖ created_at(rfc3339) ‖ actor_id)
//! ```
//!
//! [`record`] runs inside the caller's business transaction, so the audit
//! row commits or vanishes with the action it describes. [`verify`] walks a
//! tenant's rows in insertion order and reports the first break.
//!
//! Canonical JSON here means objects serialized with keys sorted
//! lexicographically at every level, no insignificant whitespace.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use shared_store::{AuditRow, Store, StoreError, Txn};
use shared_types::TenantId;
use tracing::warn;

/// The hash a genesis row links back to.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// The describable part of an audit event; digest input.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub tenant_id: TenantId,
    pub actor_id: String,
    /// Dotted action name, e.g. `command.approved`, `collector_key.issued`.
    pub event_type: String,
    pub target_type: String,
    pub target_id: String,
    /// Free-form action detail; folded into the payload digest.
    pub detail: serde_json::Value,
}

/// Serialize a JSON value with object keys sorted at every level.
fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        canonicalize(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let elems: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", elems.join(","))
        }
        other => other.to_string(),
    }
}

/// SHA-256 of the canonical JSON of an event.
#[must_use]
pub fn payload_digest(event: &AuditEvent) -> [u8; 32] {
    let value = serde_json::to_value(event).unwrap_or_default();
    Sha256::digest(canonicalize(&value).as_bytes()).into()
}

fn self_hash(
    previous_hash: &[u8; 32],
    digest: &[u8; 32],
    created_at: &chrono::DateTime<Utc>,
    actor_id: &str,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash);
    hasher.update(digest);
    hasher.update(created_at.to_rfc3339_opts(SecondsFormat::Micros, true).as_bytes());
    hasher.update(actor_id.as_bytes());
    hasher.finalize().into()
}

/// Append an audit event inside the caller's transaction, linking it to the
/// tenant's chain. Returns the assigned row id.
pub fn record(txn: &mut Txn<'_>, event: &AuditEvent) -> Result<u64, StoreError> {
    let previous_hash = txn.last_audit_hash(&event.tenant_id).unwrap_or(GENESIS_HASH);
    let digest = payload_digest(event);
    let created_at = Utc::now();
    let hash = self_hash(&previous_hash, &digest, &created_at, &event.actor_id);

    let id = txn.append_audit(AuditRow {
        id: 0, // assigned by the store
        tenant_id: event.tenant_id.clone(),
        actor_id: event.actor_id.clone(),
        event_type: event.event_type.clone(),
        target_type: event.target_type.clone(),
        target_id: event.target_id.clone(),
        previous_hash,
        payload_digest: digest,
        self_hash: hash,
        created_at,
    });
    Ok(id)
}

/// Outcome of a chain walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyResult {
    pub verify_ok: bool,
    /// Id of the first row whose linkage or hash fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_broken_event_id: Option<u64>,
    /// Rows checked.
    pub checked: usize,
}

/// Walk a tenant's audit rows in insertion order, recomputing every link.
///
/// The first row must link to the zero block; each later row must link to
/// its predecessor's `self_hash`; every row's stored `self_hash` must match
/// the recomputation over its stored fields.
#[must_use]
pub fn verify(store: &Store, tenant: &TenantId) -> VerifyResult {
    store.read(|t| {
        let rows = t.audit_rows_for(tenant);
        let mut expected_previous = GENESIS_HASH;

        for row in &rows {
            let recomputed =
                self_hash(&row.previous_hash, &row.payload_digest, &row.created_at, &row.actor_id);
            let broken =
                row.previous_hash != expected_previous || recomputed != row.self_hash;
            if broken {
                warn!(
                    tenant = %tenant,
                    row_id = row.id,
                    "Audit chain verification failed"
                );
                return VerifyResult {
                    verify_ok: false,
                    first_broken_event_id: Some(row.id),
                    checked: rows.len(),
                };
            }
            expected_previous = row.self_hash;
        }

        VerifyResult {
            verify_ok: true,
            first_broken_event_id: None,
            checked: rows.len(),
        }
    })
}
