//! # Authorization Seam
//!
//! A single `Authorize(actor, action, resource)` check called at the start
//! of every protected operation. Roles are never threaded through handler
//! arguments; handlers hold an `Arc<dyn Authorize>` and ask.

use crate::ids::TenantId;
use serde::{Deserialize, Serialize};

/// Who is acting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable user/service id.
    pub id: String,
    /// Tenant the session belongs to. Service actors with fleet-wide
    /// privileges run with `tenant: None`.
    pub tenant: Option<TenantId>,
    /// True for operator/staff sessions.
    pub operator: bool,
}

impl Actor {
    /// A tenant-scoped user actor.
    #[must_use]
    pub fn user(id: impl Into<String>, tenant: TenantId) -> Self {
        Self {
            id: id.into(),
            tenant: Some(tenant),
            operator: false,
        }
    }

    /// A fleet-wide operator actor.
    #[must_use]
    pub fn operator(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant: None,
            operator: true,
        }
    }
}

/// What is being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateCommand,
    ApproveCommand,
    CancelCommand,
    VerifyAuditChain,
    ReplayDlq,
    ManageCollectorKeys,
    RegisterDevice,
}

/// What it is being attempted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Tenant(TenantId),
    /// Fleet-level resources (DLQ, device registry).
    Fleet,
}

/// Allow / deny verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// The authorization interface.
pub trait Authorize: Send + Sync {
    /// Decide whether `actor` may perform `action` on `resource`.
    fn authorize(&self, actor: &Actor, action: Action, resource: &Resource) -> Decision;
}

/// Default policy: operators may do anything; tenant users may act on their
/// own tenant except for fleet-level operations.
#[derive(Debug, Default, Clone)]
pub struct TenantScopedAuthorizer;

impl Authorize for TenantScopedAuthorizer {
    fn authorize(&self, actor: &Actor, action: Action, resource: &Resource) -> Decision {
        if actor.operator {
            return Decision::Allow;
        }
        match (resource, action) {
            (Resource::Fleet, _) => Decision::Deny,
            (Resource::Tenant(tenant), action) => {
                let same_tenant = actor.tenant.as_ref() == Some(tenant);
                let tenant_action = matches!(
                    action,
                    Action::CreateCommand
                        | Action::ApproveCommand
                        | Action::CancelCommand
                        | Action::VerifyAuditChain
                );
                if same_tenant && tenant_action {
                    Decision::Allow
                } else {
                    Decision::Deny
                }
            }
        }
    }
}
