//! # Event Envelope
//!
//! The wire shape every domain event takes between the outbox, the bus and
//! the consumers: `{event_id, kind, tenant_id, created_at, payload}` keyed by
//! `tenant_id:entity_id`.
//!
//! The `kind` string doubles as the routing key: everything up to the first
//! `.` is the domain, and the domain selects the topic `events.<domain>`.

use crate::ids::{EventId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Routing domains. One bus topic per domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Miner fleet lifecycle and telemetry-driven events.
    Miner,
    /// Treasury / payout events.
    Treasury,
    /// Operational events (commands, maintenance).
    Ops,
    /// CRM events.
    Crm,
}

impl Domain {
    /// The bus topic this domain routes to.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Miner => "events.miner",
            Self::Treasury => "events.treasury",
            Self::Ops => "events.ops",
            Self::Crm => "events.crm",
        }
    }

    /// All routed topics, in declaration order.
    #[must_use]
    pub fn all_topics() -> [&'static str; 4] {
        [
            Self::Miner.topic(),
            Self::Treasury.topic(),
            Self::Ops.topic(),
            Self::Crm.topic(),
        ]
    }
}

/// Topic for replayed/unroutable events.
pub const DLQ_TOPIC: &str = "events.dlq";

/// An event kind such as `miner.added` or `treasury.payout_settled`.
///
/// Kinds are dotted strings; the leading segment is the routing domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKind(pub String);

impl EventKind {
    /// Build a kind from a raw string.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// View as `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the routing domain, if the leading segment names one.
    ///
    /// Unknown domains return `None`; the publisher routes those to the DLQ
    /// topic rather than inventing a topic name.
    #[must_use]
    pub fn domain(&self) -> Option<Domain> {
        let head = self.0.split('.').next().unwrap_or("");
        match head {
            "miner" => Some(Domain::Miner),
            "treasury" => Some(Domain::Treasury),
            "ops" => Some(Domain::Ops),
            "crm" => Some(Domain::Crm),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The universal message envelope published per outbox row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Outbox row id; the consumer's dedupe key.
    pub event_id: EventId,
    /// Dotted event kind (`miner.added`, ...).
    pub kind: EventKind,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Entity the event is about; partition affinity. Absent for
    /// tenant-global events.
    pub entity_id: Option<String>,
    /// Wall-clock time the outbox row was written.
    pub created_at: DateTime<Utc>,
    /// Event payload. Validated per kind at the consume boundary.
    pub payload: serde_json::Value,
    /// True when the envelope was re-injected by the DLQ replayer.
    #[serde(default)]
    pub replayed: bool,
}

impl EventEnvelope {
    /// Partition key: `tenant_id:entity_id`, falling back to the tenant when
    /// the event has no entity. Equal keys map to the same partition, which
    /// is what gives per-entity ordering.
    #[must_use]
    pub fn partition_key(&self) -> String {
        match &self.entity_id {
            Some(entity) => format!("{}:{}", self.tenant_id, entity),
            None => self.tenant_id.to_string(),
        }
    }
}
