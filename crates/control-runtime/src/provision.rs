//! Fleet provisioning: collector keys, edge devices, miner registry.
//!
//! These are the business writes the external CRM surface performs; the
//! core owns them because they are credential-bearing and audited. Every
//! mutation appends an outbox event and an audit row in the same
//! transaction as the business row.

use chrono::Utc;
use hs_10_audit_chain::AuditEvent;
use sha2::{Digest, Sha256};
use shared_store::{append_event, CollectorKeyRow, EdgeDeviceRow, MinerRow, Store, StoreError};
use shared_types::{
    DeviceId, EventKind, KeyId, MinerId, SiteId, TenantId, COLLECTOR_KEY_PREFIX,
};
use uuid::Uuid;

/// Issue a collector key for a site.
///
/// Returns the plaintext `hsc_` token, the only time it exists outside
/// the caller's hands. The store keeps the SHA-256 of it.
pub fn issue_collector_key(
    store: &Store,
    tenant: &TenantId,
    site: &SiteId,
    actor_id: &str,
) -> Result<(KeyId, String), StoreError> {
    let token = format!("{COLLECTOR_KEY_PREFIX}{}", Uuid::new_v4().simple());
    let key_hash = hex::encode(Sha256::digest(token.as_bytes()));
    let id = KeyId::new();

    store.transact(|txn| {
        txn.insert_collector_key(CollectorKeyRow {
            id,
            site_id: site.clone(),
            key_hash: key_hash.clone(),
            created_at: Utc::now(),
            revoked_at: None,
        })?;
        hs_10_audit_chain::record(
            txn,
            &AuditEvent {
                tenant_id: tenant.clone(),
                actor_id: actor_id.to_string(),
                event_type: "collector_key.issued".into(),
                target_type: "collector_key".into(),
                target_id: id.to_string(),
                detail: serde_json::json!({ "site_id": site }),
            },
        )?;
        Ok(())
    })?;

    Ok((id, token))
}

/// Register an edge device with its command-signing secret.
pub fn register_device(
    store: &Store,
    tenant: &TenantId,
    site: &SiteId,
    device: &DeviceId,
    name: &str,
    hmac_secret: Vec<u8>,
    actor_id: &str,
) -> Result<(), StoreError> {
    store.transact(|txn| {
        txn.insert_device(EdgeDeviceRow {
            id: device.clone(),
            site_id: site.clone(),
            name: name.to_string(),
            hmac_secret: hmac_secret.clone(),
            registered_at: Utc::now(),
            revoked_at: None,
            last_seen_at: None,
        })?;
        hs_10_audit_chain::record(
            txn,
            &AuditEvent {
                tenant_id: tenant.clone(),
                actor_id: actor_id.to_string(),
                event_type: "edge_device.registered".into(),
                target_type: "edge_device".into(),
                target_id: device.to_string(),
                detail: serde_json::json!({ "site_id": site, "name": name }),
            },
        )?;
        Ok(())
    })
}

/// Register a miner into a site, emitting `miner.added` for the consumers.
pub fn register_miner(
    store: &Store,
    tenant: &TenantId,
    site: &SiteId,
    miner: &MinerId,
    payload: serde_json::Value,
) -> Result<(), StoreError> {
    store.transact(|txn| {
        txn.insert_miner(MinerRow {
            site_id: site.clone(),
            miner_id: miner.clone(),
            tenant_id: tenant.clone(),
            registered_at: Utc::now(),
        })?;
        append_event(
            txn,
            EventKind::from("miner.added"),
            tenant.clone(),
            Some(miner.to_string()),
            payload.clone(),
            None,
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_key_stores_hash_only() {
        let store = Store::new();
        let (id, token) = issue_collector_key(
            &store,
            &TenantId::from("T1"),
            &SiteId::from("S1"),
            "ops-1",
        )
        .unwrap();
        assert!(token.starts_with(COLLECTOR_KEY_PREFIX));

        let expected_hash = hex::encode(Sha256::digest(token.as_bytes()));
        store.read(|t| {
            let row = t.collector_key(id).unwrap();
            assert_eq!(row.key_hash, expected_hash);
            // Plaintext is nowhere in the row.
            assert_ne!(row.key_hash, token);
            // Issuance is audited.
            assert_eq!(t.audit_rows_for(&TenantId::from("T1")).len(), 1);
        });
    }

    #[test]
    fn test_register_miner_appends_outbox() {
        let store = Store::new();
        register_miner(
            &store,
            &TenantId::from("T1"),
            &SiteId::from("S1"),
            &MinerId::from("M7"),
            serde_json::json!({"ip": "10.0.0.7"}),
        )
        .unwrap();

        store.read(|t| {
            assert!(t.miner(&SiteId::from("S1"), &MinerId::from("M7")).is_some());
            assert_eq!(t.outbox_len(), 1);
        });

        // Same miner again: the whole transaction rolls back, no orphan event.
        let err = register_miner(
            &store,
            &TenantId::from("T1"),
            &SiteId::from("S1"),
            &MinerId::from("M7"),
            serde_json::json!({}),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        store.read(|t| assert_eq!(t.outbox_len(), 1));
    }
}
