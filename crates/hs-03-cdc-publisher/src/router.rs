//! Outbox router: event kind to bus topic.

use shared_types::events::DLQ_TOPIC;
use shared_types::EventKind;
use tracing::warn;

/// Topic for an event kind.
///
/// The segment before the first `.` names the domain and the domain names
/// the topic. Kinds with no known domain go to the DLQ topic so nothing is
/// silently lost and an operator sees them.
#[must_use]
pub fn route_topic(kind: &EventKind) -> &'static str {
    match kind.domain() {
        Some(domain) => domain.topic(),
        None => {
            warn!(kind = %kind, "Unroutable event kind, sending to DLQ topic");
            DLQ_TOPIC
        }
    }
}
