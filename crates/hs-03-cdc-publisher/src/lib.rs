//! # CDC Publisher - Outbox to Bus
//!
//! Converts committed outbox rows into envelopes on `events.<domain>`.
//! This is the poller mode of the CDC contract: every `P` seconds, up to
//! `B` unpublished rows are read in `created_at` order, published, and
//! stamped `published_at` only after the transport acknowledges.
//!
//! ## Failure Semantics
//!
//! - Transient transport errors (backpressure): exponential backoff with
//!   jitter; the cursor does not advance, nothing is skipped or dropped.
//! - Permanent transport errors (topic missing): the circuit opens, the
//!   poller stops producing load, and a probe is attempted after the open
//!   timeout. The failing row stays first in line.
//! - A crash between transport-ack and the `published_at` stamp yields a
//!   duplicate on restart; consumers dedupe via the inbox.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod breaker;
pub mod poller;
pub mod router;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use poller::{OutboxPublisher, PublisherHandle};
pub use router::route_topic;
