//! # Outbox Writer
//!
//! The one helper business code calls to emit a domain event: an insert
//! into the outbox inside the caller's in-progress transaction. The
//! business commit IS the publish commit; no network I/O happens here.

use crate::error::StoreError;
use crate::rows::OutboxRow;
use crate::txn::Txn;
use chrono::Utc;
use shared_types::{EventId, EventKind, TenantId};

/// Append a domain event to the outbox inside `txn`.
///
/// Returns the new event id. Fails with [`StoreError::DuplicateKey`] when
/// `idempotency_key` collides with an earlier event; the caller decides
/// whether that means "idempotent retry, ignore" or is a bug to propagate.
pub fn append_event(
    txn: &mut Txn<'_>,
    kind: EventKind,
    tenant_id: TenantId,
    entity_id: Option<String>,
    payload: serde_json::Value,
    idempotency_key: Option<String>,
) -> Result<EventId, StoreError> {
    let row = OutboxRow {
        id: EventId::new(),
        kind,
        tenant_id,
        entity_id,
        payload,
        idempotency_key,
        created_at: Utc::now(),
        published_at: None,
    };
    let id = row.id;
    txn.insert_outbox(row)?;
    Ok(id)
}
