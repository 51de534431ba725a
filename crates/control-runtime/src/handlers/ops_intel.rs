//! Ops intelligence consumer: command completions from `events.ops`.

use chrono::Utc;
use hs_05_consumer_runtime::{EventHandler, HandlerError};
use shared_store::{CrmActivityRow, Txn};
use shared_types::EventEnvelope;

/// Folds command outcomes into the tenant activity feed. A fuller system
/// would feed a forecasting view here; the shape is the same.
#[derive(Debug, Default)]
pub struct OpsIntelHandler;

impl EventHandler for OpsIntelHandler {
    fn handle(&self, envelope: &EventEnvelope, txn: &mut Txn<'_>) -> Result<(), HandlerError> {
        match envelope.kind.as_str() {
            "ops.command_completed" => {
                let status = envelope.payload["status"].as_str().unwrap_or("unknown");
                let command_type =
                    envelope.payload["command_type"].as_str().unwrap_or("command");
                txn.set_crm_activity(CrmActivityRow {
                    tenant_id: envelope.tenant_id.clone(),
                    last_event_kind: envelope.kind.clone(),
                    note: format!("{command_type} {status}"),
                    updated_at: Utc::now(),
                });
                Ok(())
            }
            other => Err(HandlerError::Permanent(format!("unknown event kind {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_store::Store;
    use shared_types::{EventId, EventKind, TenantId};

    #[test]
    fn test_command_completion_noted() {
        let store = Store::new();
        let envelope = EventEnvelope {
            event_id: EventId::new(),
            kind: EventKind::from("ops.command_completed"),
            tenant_id: TenantId::from("T1"),
            entity_id: Some("cmd-1".into()),
            created_at: Utc::now(),
            payload: serde_json::json!({"command_type": "reboot", "status": "failed"}),
            replayed: false,
        };
        store
            .transact(|txn| {
                OpsIntelHandler
                    .handle(&envelope, txn)
                    .map_err(|e| shared_store::StoreError::Aborted(e.into()))
            })
            .unwrap();

        store.read(|t| {
            let row = t.crm_activity(&TenantId::from("T1")).unwrap();
            assert_eq!(row.note, "reboot failed");
        });
    }
}
