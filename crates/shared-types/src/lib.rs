//! # Shared Types - Domain Vocabulary for the HashSentry Core
//!
//! Every crate in the workspace speaks in terms of these types. The rules:
//!
//! - **Ids are opaque.** Tenants, sites and miners are identified by strings
//!   handed to us by the fleet; events and commands by UUIDs we mint.
//! - **Events carry an envelope.** Everything that crosses the bus is an
//!   [`EventEnvelope`]; the payload is an opaque JSON blob validated at the
//!   publish and consume boundaries.
//! - **Errors classify.** [`CoreError`] is the single taxonomy every surface
//!   maps onto (HTTP status, consumer retry/DLQ decision).
//!
//! No I/O lives here. This crate must stay dependency-light so the edge
//! collector can link it without pulling server-side machinery.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod auth;
pub mod commands;
pub mod config;
pub mod errors;
pub mod events;
pub mod ids;
pub mod signing;
pub mod telemetry;

// Re-export main types
pub use auth::{Action, Actor, Authorize, Decision, Resource, TenantScopedAuthorizer};
pub use commands::{
    CommandResultReport, CommandResultStatus, CommandSpec, CommandStatus, CommandType,
    MinerResultEntry, PendingCommand, TargetScope,
};
pub use config::CoreConfig;
pub use errors::{CoreError, ErrorBody, ErrorKind};
pub use events::{Domain, EventEnvelope, EventKind};
pub use ids::{CommandId, DeviceId, EventId, KeyId, MinerId, SiteId, TenantId};
pub use telemetry::{BoardStats, OverallHealth, TelemetryRecord};

/// Current wire version for bus envelopes and signed commands.
pub const PROTOCOL_VERSION: u16 = 1;

/// Collector key plaintext prefix. The full header value (prefix included)
/// is what gets hashed and stored.
pub const COLLECTOR_KEY_PREFIX: &str = "hsc_";
