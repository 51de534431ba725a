//! `GET /audit/verify`.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use hs_10_audit_chain::VerifyResult;
use serde::Deserialize;
use shared_types::{Action, CoreError, Resource, TenantId};

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub tenant: String,
}

/// Walk a tenant's audit chain and report integrity.
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerifyResult>, ApiError> {
    let actor = state.session_actor(&headers)?;
    let tenant = TenantId::from(query.tenant);

    if !state
        .authorizer
        .authorize(&actor, Action::VerifyAuditChain, &Resource::Tenant(tenant.clone()))
        .is_allowed()
    {
        return Err(ApiError(CoreError::Forbidden("verify_audit_chain".into())));
    }

    Ok(Json(hs_10_audit_chain::verify(&state.store, &tenant)))
}
