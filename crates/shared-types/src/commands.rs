//! # Command Model
//!
//! Cloud → edge miner commands: the type vocabulary, the status state
//! machine, and the signed wire shape the edge receives.
//!
//! Several wire types are historical synonyms (`restart`/`reboot`,
//! `change_pool`/`set_pool`, `set_freq`/`set_frequency`). All of them parse,
//! and creation normalizes to the canonical variant, so the edge only ever
//! executes canonical types.

use crate::ids::{CommandId, SiteId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command types accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Reboot,
    Restart,
    PowerMode,
    ChangePool,
    SetPool,
    SetFreq,
    SetFrequency,
    SetFan,
    ThermalPolicy,
    Led,
    Enable,
    Disable,
}

impl CommandType {
    /// Collapse wire synonyms to the canonical variant.
    #[must_use]
    pub fn canonical(self) -> Self {
        match self {
            Self::Restart => Self::Reboot,
            Self::ChangePool => Self::SetPool,
            Self::SetFreq => Self::SetFrequency,
            other => other,
        }
    }

    /// Canonical snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self.canonical() {
            Self::Reboot => "reboot",
            Self::PowerMode => "power_mode",
            Self::SetPool => "set_pool",
            Self::SetFrequency => "set_frequency",
            Self::SetFan => "set_fan",
            Self::ThermalPolicy => "thermal_policy",
            Self::Led => "led",
            Self::Enable => "enable",
            Self::Disable => "disable",
            // canonical() never returns a synonym
            Self::Restart | Self::ChangePool | Self::SetFreq => unreachable!(),
        }
    }
}

/// What the target id list refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetScope {
    Miner,
    Group,
    Site,
}

/// Parent command lifecycle. Transitions are forward-only; terminal states
/// are frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    PendingApproval,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Expired,
}

impl CommandStatus {
    /// True once the command can never change again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Whether `self -> next` is a legal forward transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use CommandStatus::*;
        match (self, next) {
            (Pending, PendingApproval | Queued | Cancelled | Expired) => true,
            (PendingApproval, Queued | Cancelled | Expired) => true,
            (Queued, Running | Cancelled | Expired) => true,
            // A running command that times out reverts to queued for refetch.
            (Running, Succeeded | Failed | Expired | Queued) => true,
            _ => false,
        }
    }
}

/// Per-target execution result status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandResultStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl CommandResultStatus {
    /// True for results that end a target's execution.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Creation request, as accepted by `POST /commands`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub tenant_id: TenantId,
    pub site_id: SiteId,
    pub requester_id: String,
    pub command_type: CommandType,
    pub target_scope: TargetScope,
    pub target_ids: Vec<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Client-supplied dedupe key, unique per `(tenant, requester)`.
    pub idempotency_key: Option<String>,
    /// Time-to-live in minutes; defaults to `COMMAND_TTL_MIN`.
    pub ttl_minutes: Option<i64>,
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub priority: i32,
}

/// The signed shape the edge receives from `/collector/commands/pending`.
///
/// The signature covers `id ‖ dispatch_nonce ‖ expires_at(rfc3339) ‖
/// SHA-256(payload)` under the device-derived HMAC key; the edge refuses to
/// execute anything that fails verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommand {
    pub id: CommandId,
    pub command_type: CommandType,
    pub target_ids: Vec<String>,
    pub payload: serde_json::Value,
    pub dispatch_nonce: Uuid,
    pub expires_at: DateTime<Utc>,
    /// 64 hex chars of HMAC-SHA256.
    pub signature: String,
}

/// Per-miner outcome inside a result report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerResultEntry {
    pub miner_id: String,
    pub status: CommandResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub metrics: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// The edge's report for one fetched command, as posted to
/// `/collector/commands/{id}/result`. The `dispatch_nonce` and `signature`
/// echo what the server dispatched; a mismatch or an already-terminal nonce
/// is a replay and rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResultReport {
    pub dispatch_nonce: Uuid,
    pub signature: String,
    pub results: Vec<MinerResultEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synonyms_normalize() {
        assert_eq!(CommandType::Restart.canonical(), CommandType::Reboot);
        assert_eq!(CommandType::ChangePool.canonical(), CommandType::SetPool);
        assert_eq!(CommandType::SetFreq.canonical(), CommandType::SetFrequency);
        assert_eq!(CommandType::Led.canonical(), CommandType::Led);
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(CommandType::Restart.as_str(), "reboot");
        assert_eq!(CommandType::SetFreq.as_str(), "set_frequency");
        assert_eq!(CommandType::ThermalPolicy.as_str(), "thermal_policy");
    }

    #[test]
    fn test_wire_parse_snake_case() {
        let t: CommandType = serde_json::from_str("\"change_pool\"").unwrap();
        assert_eq!(t, CommandType::ChangePool);
    }

    #[test]
    fn test_status_forward_only() {
        use CommandStatus::*;
        assert!(Pending.can_transition_to(Queued));
        assert!(Pending.can_transition_to(PendingApproval));
        assert!(PendingApproval.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Queued)); // refetch revert

        assert!(!Queued.can_transition_to(Pending));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Cancelled.can_transition_to(Queued));
        assert!(!Expired.can_transition_to(Running));
    }

    #[test]
    fn test_terminal_states_frozen() {
        use CommandStatus::*;
        for terminal in [Succeeded, Failed, Cancelled, Expired] {
            assert!(terminal.is_terminal());
            for next in [
                Pending,
                PendingApproval,
                Queued,
                Running,
                Succeeded,
                Failed,
                Cancelled,
                Expired,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_result_terminal() {
        assert!(CommandResultStatus::Skipped.is_terminal());
        assert!(!CommandResultStatus::Running.is_terminal());
    }
}
