//! Row types for every table the store owns.
//!
//! Shapes follow the data model exactly; fields the application never
//! touches directly stay private to the store modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{
    CommandId, CommandResultStatus, CommandStatus, CommandType, DeviceId, ErrorKind, EventId,
    EventKind, KeyId, MinerId, SiteId, TargetScope, TelemetryRecord, TenantId,
};
use uuid::Uuid;

/// One pending/published domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: EventId,
    pub kind: EventKind,
    pub tenant_id: TenantId,
    pub entity_id: Option<String>,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Stamped by the publisher once the transport acknowledged. The only
    /// mutable field on this row.
    pub published_at: Option<DateTime<Utc>>,
}

/// Consumption marker making a handler's side effects non-replayable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxRow {
    pub consumer_name: String,
    pub event_id: EventId,
    pub event_kind: EventKind,
    pub consumed_at: DateTime<Utc>,
    pub processing_duration_ms: u64,
    /// SHA-256 of the payload, hex. Diagnostic only.
    pub payload_digest: String,
}

/// Terminal consumer failure held for inspection and replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRow {
    pub id: Uuid,
    pub consumer_name: String,
    pub event_id: EventId,
    pub event_kind: EventKind,
    /// The full envelope, so replay needs nothing else.
    pub payload: serde_json::Value,
    pub error_kind: ErrorKind,
    pub error_detail: String,
    pub retry_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub replayed: bool,
    pub replayed_at: Option<DateTime<Utc>>,
}

/// A queued miner command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRow {
    pub id: CommandId,
    pub tenant_id: TenantId,
    pub site_id: SiteId,
    pub requester_id: String,
    pub command_type: CommandType,
    pub target_scope: TargetScope,
    pub target_ids: Vec<String>,
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    pub priority: i32,
    pub require_approval: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub dispatch_nonce: Uuid,
    /// 64 hex chars of HMAC-SHA256 over the dispatch fields.
    pub signature: String,
    /// Device that last fetched this command.
    pub fetched_by: Option<DeviceId>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Times the command was handed out after a running timeout.
    pub fetch_count: u32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-target execution outcome reported by the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResultRow {
    pub id: Uuid,
    pub command_id: CommandId,
    pub edge_device_id: DeviceId,
    /// Target miner as named by the edge; not guaranteed numeric.
    pub miner_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_status: CommandResultStatus,
    pub result_message: Option<String>,
    pub metrics: serde_json::Value,
}

/// A collector API key. Only the hash is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorKeyRow {
    pub id: KeyId,
    pub site_id: SiteId,
    /// SHA-256 of the full `hsc_<token>` header value, hex.
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl CollectorKeyRow {
    /// Active means not revoked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// An on-prem edge collector device and its command-signing secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDeviceRow {
    pub id: DeviceId,
    pub site_id: SiteId,
    pub name: String,
    /// Shared secret for command signing. Never exposed over HTTP.
    pub hmac_secret: Vec<u8>,
    pub registered_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Fleet registry row scoping a miner to a site and tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerRow {
    pub site_id: SiteId,
    pub miner_id: MinerId,
    pub tenant_id: TenantId,
    pub registered_at: DateTime<Utc>,
}

/// Latest telemetry snapshot per miner. Upserted on every upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryLiveRow {
    pub site_id: SiteId,
    pub record: TelemetryRecord,
    pub updated_at: DateTime<Utc>,
}

/// Append-only telemetry time-series row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryHistoryRow {
    pub site_id: SiteId,
    pub record: TelemetryRecord,
    /// Edge-supplied sample time, falling back to receipt time.
    pub timestamp: DateTime<Utc>,
}

/// Compression applied to an upload body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
}

/// Upload outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadOutcome {
    Accepted,
    Rejected,
}

/// One row per `/collector/upload` request, accepted or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadLogRow {
    pub id: Uuid,
    pub site_id: SiteId,
    pub key_id: KeyId,
    pub received_at: DateTime<Utc>,
    pub miner_count: usize,
    pub online_count: usize,
    pub offline_count: usize,
    pub processing_time_ms: u64,
    pub payload_size_bytes: u64,
    pub compression: Compression,
    pub client_ip: String,
    pub outcome: UploadOutcome,
    pub reject_reason: Option<String>,
}

/// Append-only audit event with per-tenant hash chain linkage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    /// Store-assigned insertion-ordered id.
    pub id: u64,
    pub tenant_id: TenantId,
    pub actor_id: String,
    pub event_type: String,
    pub target_type: String,
    pub target_id: String,
    pub previous_hash: [u8; 32],
    pub payload_digest: [u8; 32],
    pub self_hash: [u8; 32],
    pub created_at: DateTime<Utc>,
}

/// Derived per-tenant portfolio summary, owned by the portfolio consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRow {
    pub tenant_id: TenantId,
    pub miner_count: u64,
    pub total_hashrate_ghs: f64,
    pub updated_at: DateTime<Utc>,
}

/// Derived per-tenant CRM activity feed entry, owned by the crm consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmActivityRow {
    pub tenant_id: TenantId,
    pub last_event_kind: EventKind,
    pub note: String,
    pub updated_at: DateTime<Utc>,
}
