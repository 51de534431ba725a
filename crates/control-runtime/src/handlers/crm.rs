//! CRM consumer: per-tenant activity feed from `events.crm`.

use chrono::Utc;
use hs_05_consumer_runtime::{EventHandler, HandlerError};
use shared_store::{CrmActivityRow, Txn};
use shared_types::EventEnvelope;

/// Maintains `crm_activity`: the tenant's last-seen CRM event.
#[derive(Debug, Default)]
pub struct CrmHandler;

impl EventHandler for CrmHandler {
    fn handle(&self, envelope: &EventEnvelope, txn: &mut Txn<'_>) -> Result<(), HandlerError> {
        if envelope.kind.domain() != Some(shared_types::Domain::Crm) {
            return Err(HandlerError::Permanent(format!(
                "unexpected kind {} on crm consumer",
                envelope.kind
            )));
        }
        let note = envelope.payload["note"]
            .as_str()
            .unwrap_or(envelope.kind.as_str())
            .to_string();
        txn.set_crm_activity(CrmActivityRow {
            tenant_id: envelope.tenant_id.clone(),
            last_event_kind: envelope.kind.clone(),
            note,
            updated_at: Utc::now(),
        });
        Ok(())
    }
}
