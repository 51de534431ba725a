//! Operator surface: DLQ inspection/replay, collector keys, edge devices,
//! upload log.
//!
//! Fleet-scoped and operator-only; every mutation is audited. The DLQ
//! replayer itself lives in its own crate; these routes just authenticate,
//! authorize and translate.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use hs_06_dlq_replayer::{DlqFilter, DlqReplayer, DlqStats, ReplayReport};
use hs_07_collector_ingest::{ApiError, AppState};
use hs_10_audit_chain::AuditEvent;
use serde::{Deserialize, Serialize};
use shared_types::{Action, CoreError, DeviceId, EventKind, KeyId, Resource, SiteId, TenantId};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize, Default)]
pub struct DlqQuery {
    pub consumer: Option<String>,
    pub kind: Option<String>,
    pub tenant: Option<String>,
    pub failed_after: Option<DateTime<Utc>>,
    pub failed_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_replayed: bool,
    pub limit: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
}

impl DlqQuery {
    fn filter(&self) -> DlqFilter {
        DlqFilter {
            consumer_name: self.consumer.clone(),
            event_kind: self.kind.as_deref().map(EventKind::from),
            tenant: self.tenant.as_deref().map(TenantId::from),
            failed_after: self.failed_after,
            failed_before: self.failed_before,
            include_replayed: self.include_replayed,
        }
    }
}

fn authorize_operator(
    state: &AppState,
    headers: &HeaderMap,
    action: Action,
) -> Result<String, ApiError> {
    let actor = state.session_actor(headers)?;
    if !state
        .authorizer
        .authorize(&actor, action, &Resource::Fleet)
        .is_allowed()
    {
        return Err(ApiError(CoreError::Forbidden(format!("{action:?}"))));
    }
    Ok(actor.id)
}

fn replayer(state: &AppState) -> DlqReplayer {
    DlqReplayer::new(state.store.clone(), state.bus.clone())
}

async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DlqQuery>,
) -> Result<Json<DlqStats>, ApiError> {
    authorize_operator(&state, &headers, Action::ReplayDlq)?;
    Ok(Json(replayer(&state).stats(&query.filter())))
}

async fn replay(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DlqQuery>,
) -> Result<Json<ReplayReport>, ApiError> {
    let actor_id = authorize_operator(&state, &headers, Action::ReplayDlq)?;
    let filter = query.filter();
    let limit = query.limit.unwrap_or(100);

    let report = replayer(&state).replay(&filter, limit, query.dry_run).await;

    if !query.dry_run && report.replayed > 0 {
        info!(replayed = report.replayed, operator = %actor_id, "DLQ replay");
        let tenant = filter
            .tenant
            .clone()
            .unwrap_or_else(|| TenantId::from("fleet"));
        let audited = state.store.transact(|txn| {
            hs_10_audit_chain::record(
                txn,
                &AuditEvent {
                    tenant_id: tenant,
                    actor_id: actor_id.clone(),
                    event_type: "dlq.replayed".into(),
                    target_type: "dlq".into(),
                    target_id: format!("{} entries", report.replayed),
                    detail: serde_json::json!({
                        "replayed": report.replayed,
                        "failed": report.failed,
                    }),
                },
            )?;
            Ok(())
        });
        if let Err(err) = audited {
            tracing::warn!(%err, "Failed to audit DLQ replay");
        }
    }
    Ok(Json(report))
}

// ==================== collector keys ====================

#[derive(Debug, Deserialize)]
pub struct IssueKeyRequest {
    pub tenant: String,
    pub site: String,
}

#[derive(Debug, Serialize)]
pub struct IssueKeyResponse {
    pub key_id: KeyId,
    /// The plaintext token. Returned exactly once, never persisted.
    pub token: String,
}

async fn issue_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IssueKeyRequest>,
) -> Result<Json<IssueKeyResponse>, ApiError> {
    let actor_id = authorize_operator(&state, &headers, Action::ManageCollectorKeys)?;
    let (key_id, token) = crate::provision::issue_collector_key(
        &state.store,
        &TenantId::from(request.tenant),
        &SiteId::from(request.site),
        &actor_id,
    )
    .map_err(|err| ApiError(err.to_core()))?;
    Ok(Json(IssueKeyResponse { key_id, token }))
}

#[derive(Debug, Deserialize)]
pub struct RevokeKeyRequest {
    pub tenant: String,
}

async fn revoke_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<RevokeKeyRequest>,
) -> Result<Json<AckBody>, ApiError> {
    let actor_id = authorize_operator(&state, &headers, Action::ManageCollectorKeys)?;
    let id = KeyId(id);

    let key_hash = state
        .store
        .transact(|txn| {
            let row = txn
                .collector_key(id)
                .ok_or(shared_store::StoreError::NotFound {
                    table: "collector_keys",
                    key: id.to_string(),
                })?
                .clone();
            txn.revoke_collector_key(id, Utc::now())?;
            hs_10_audit_chain::record(
                txn,
                &AuditEvent {
                    tenant_id: TenantId::from(request.tenant.as_str()),
                    actor_id: actor_id.clone(),
                    event_type: "collector_key.revoked".into(),
                    target_type: "collector_key".into(),
                    target_id: id.to_string(),
                    detail: serde_json::json!({ "site_id": row.site_id }),
                },
            )?;
            Ok(row.key_hash)
        })
        .map_err(|err| ApiError(err.to_core()))?;

    // Drop the cached entry so revocation takes effect immediately instead
    // of waiting out the stale window.
    state.key_cache.invalidate(&key_hash);
    info!(key_id = %id, "Collector key revoked");
    Ok(Json(AckBody { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct SiteQuery {
    pub site: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct KeySummary {
    pub key_id: KeyId,
    pub site_id: SiteId,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

async fn list_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SiteQuery>,
) -> Result<Json<Vec<KeySummary>>, ApiError> {
    authorize_operator(&state, &headers, Action::ManageCollectorKeys)?;
    let site = SiteId::from(query.site);
    let keys = state.store.read(|t| {
        t.collector_keys_for_site(&site)
            .into_iter()
            .map(|row| KeySummary {
                key_id: row.id,
                site_id: row.site_id.clone(),
                created_at: row.created_at,
                revoked_at: row.revoked_at,
            })
            .collect()
    });
    Ok(Json(keys))
}

// ==================== devices & uploads ====================

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub tenant: String,
    pub site: String,
    pub device_id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterDeviceResponse {
    pub device_id: DeviceId,
    /// The shared secret, hex. Returned exactly once.
    pub secret: String,
}

async fn register_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterDeviceRequest>,
) -> Result<Json<RegisterDeviceResponse>, ApiError> {
    let actor_id = authorize_operator(&state, &headers, Action::RegisterDevice)?;
    let device_id = DeviceId::from(request.device_id.as_str());
    let secret: [u8; 32] = rand::random();

    crate::provision::register_device(
        &state.store,
        &TenantId::from(request.tenant),
        &SiteId::from(request.site),
        &device_id,
        &request.name,
        secret.to_vec(),
        &actor_id,
    )
    .map_err(|err| ApiError(err.to_core()))?;

    Ok(Json(RegisterDeviceResponse {
        device_id,
        secret: hex::encode(secret),
    }))
}

async fn list_uploads(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SiteQuery>,
) -> Result<Json<Vec<shared_store::UploadLogRow>>, ApiError> {
    authorize_operator(&state, &headers, Action::ManageCollectorKeys)?;
    let site = SiteId::from(query.site);
    let limit = query.limit.unwrap_or(50);
    let rows = state.store.read(|t| {
        t.upload_log_for_site(&site, limit)
            .into_iter()
            .cloned()
            .collect()
    });
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
pub struct AckBody {
    pub success: bool,
}

/// Routes mounted next to the ingest API.
#[must_use]
pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/dlq/stats", get(stats))
        .route("/admin/dlq/replay", post(replay))
        .route("/admin/keys", post(issue_key).get(list_keys))
        .route("/admin/keys/:id/revoke", post(revoke_key))
        .route("/admin/devices", post(register_device))
        .route("/admin/uploads", get(list_uploads))
        .with_state(state)
}
