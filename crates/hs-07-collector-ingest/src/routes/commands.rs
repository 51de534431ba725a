//! Command endpoints: edge fetch/result and operator create/approve/cancel.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use shared_types::{
    Action, CommandId, CommandResultReport, CommandSpec, CommandStatus, CoreError, DeviceId,
    PendingCommand, Resource,
};
use std::time::Duration;
use uuid::Uuid;

/// Server-side cap on a long-poll wait; the edge's read timeout is 25 s.
const MAX_LONG_POLL: Duration = Duration::from_secs(20);

fn device_from(headers: &HeaderMap) -> Result<DeviceId, CoreError> {
    headers
        .get("X-Edge-Device")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(DeviceId::from)
        .ok_or(CoreError::Unauthorized)
}

// ==================== edge surface ====================

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    /// Long-poll wait in milliseconds (capped server-side).
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub commands: Vec<PendingCommand>,
    pub count: usize,
}

/// `GET /collector/commands/pending`.
pub async fn pending(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PendingQuery>,
) -> Result<Json<PendingResponse>, ApiError> {
    let identity = state.authenticate_collector(&headers)?;
    let device = device_from(&headers)?;

    let wait = query
        .wait_ms
        .map_or(MAX_LONG_POLL, Duration::from_millis)
        .min(MAX_LONG_POLL);

    let commands = state
        .commands
        .fetch_pending(&identity.site_id, &device, wait)
        .await?;
    let count = commands.len();
    Ok(Json(PendingResponse { commands, count }))
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub success: bool,
    pub status: CommandStatus,
}

/// `POST /collector/commands/{id}/result`.
pub async fn result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(report): Json<CommandResultReport>,
) -> Result<Json<ResultResponse>, ApiError> {
    let _identity = state.authenticate_collector(&headers)?;
    let device = device_from(&headers)?;

    let status = state
        .commands
        .report_result(CommandId(id), &device, &report)?;
    Ok(Json(ResultResponse { success: true, status }))
}

// ==================== operator surface ====================

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: CommandId,
    pub deduped: bool,
}

/// `POST /commands`.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(spec): Json<CommandSpec>,
) -> Result<Json<CreateResponse>, ApiError> {
    let actor = state.session_actor(&headers)?;
    let resource = Resource::Tenant(spec.tenant_id.clone());
    if !state
        .authorizer
        .authorize(&actor, Action::CreateCommand, &resource)
        .is_allowed()
    {
        return Err(ApiError(CoreError::Forbidden("create_command".into())));
    }

    let outcome = state.commands.create(&spec, &actor)?;
    Ok(Json(CreateResponse { id: outcome.id, deduped: outcome.deduped }))
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
}

fn command_tenant(state: &AppState, id: CommandId) -> Result<shared_types::TenantId, CoreError> {
    state
        .store
        .read(|t| t.command(id).map(|c| c.tenant_id.clone()))
        .ok_or_else(|| CoreError::NotFound(format!("command {id}")))
}

/// `POST /commands/{id}/approve`.
pub async fn approve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<AckResponse>, ApiError> {
    let actor = state.session_actor(&headers)?;
    let id = CommandId(id);
    let tenant = command_tenant(&state, id)?;
    if !state
        .authorizer
        .authorize(&actor, Action::ApproveCommand, &Resource::Tenant(tenant))
        .is_allowed()
    {
        return Err(ApiError(CoreError::Forbidden("approve_command".into())));
    }
    state.commands.approve(id, &actor)?;
    Ok(Json(AckResponse { success: true }))
}

/// `POST /commands/{id}/cancel`.
pub async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<AckResponse>, ApiError> {
    let actor = state.session_actor(&headers)?;
    let id = CommandId(id);
    let tenant = command_tenant(&state, id)?;
    if !state
        .authorizer
        .authorize(&actor, Action::CancelCommand, &Resource::Tenant(tenant))
        .is_allowed()
    {
        return Err(ApiError(CoreError::Forbidden("cancel_command".into())));
    }
    state.commands.cancel(id, &actor)?;
    Ok(Json(AckResponse { success: true }))
}
