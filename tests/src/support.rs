//! Shared fixtures for the integration suite.

use hs_07_collector_ingest::{AppState, StaticSessionAuth};
use hs_08_command_queue::CommandService;
use sha2::{Digest, Sha256};
use shared_bus::MessageBus;
use shared_store::{CollectorKeyRow, EdgeDeviceRow, MinerRow, Store};
use shared_types::config::{CommandConfig, CoreConfig, IngestConfig};
use shared_types::{
    Actor, DeviceId, KeyId, MinerId, SiteId, TenantId, TenantScopedAuthorizer,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

pub const COLLECTOR_KEY: &str = "hsc_integration-key";
pub const DEVICE_SECRET: &[u8] = b"integration-device-secret";
pub const USER_TOKEN: &str = "tok-user";
pub const OPERATOR_TOKEN: &str = "tok-operator";

pub fn tenant() -> TenantId {
    TenantId::from("T1")
}

pub fn site() -> SiteId {
    SiteId::from("S1")
}

pub fn device() -> DeviceId {
    DeviceId::from("edge-1")
}

/// A store with one site: collector key, edge device, and the given miners.
pub fn seeded_store(miners: &[&str]) -> Store {
    let store = Store::new();
    store
        .transact(|txn| {
            txn.insert_collector_key(CollectorKeyRow {
                id: KeyId::new(),
                site_id: site(),
                key_hash: hex::encode(Sha256::digest(COLLECTOR_KEY.as_bytes())),
                created_at: Utc::now(),
                revoked_at: None,
            })?;
            txn.insert_device(EdgeDeviceRow {
                id: device(),
                site_id: site(),
                name: "integration".into(),
                hmac_secret: DEVICE_SECRET.to_vec(),
                registered_at: Utc::now(),
                revoked_at: None,
                last_seen_at: None,
            })?;
            for miner in miners {
                txn.insert_miner(MinerRow {
                    site_id: site(),
                    miner_id: MinerId::from(*miner),
                    tenant_id: tenant(),
                    registered_at: Utc::now(),
                })?;
            }
            Ok(())
        })
        .unwrap();
    store
}

/// App state over a seeded store, with a user and an operator session.
pub fn app_state(store: Store) -> AppState {
    let commands = Arc::new(CommandService::new(store.clone(), CommandConfig::default()));
    let sessions = StaticSessionAuth::new()
        .with_token(USER_TOKEN, Actor::user("u1", tenant()))
        .with_token(OPERATOR_TOKEN, Actor::operator("ops-1"));
    AppState::new(
        store,
        Arc::new(MessageBus::new()),
        commands,
        Arc::new(sessions),
        Arc::new(TenantScopedAuthorizer),
        IngestConfig::default(),
    )
}

/// Core config tightened for test latencies.
pub fn fast_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.outbox.poll_interval = Duration::from_millis(20);
    config.consumer.backoff_base = Duration::from_millis(1);
    config
}
