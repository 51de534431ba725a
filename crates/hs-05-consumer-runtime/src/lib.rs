//! # Consumer Runtime - Exactly-Once Event Handling
//!
//! Each consumer group pins to one domain topic. Per delivery, the runtime:
//!
//! 1. Acquires a TTL-bounded per-entity lock keyed by the partition key;
//!    a held lock nacks the delivery for bounded redelivery.
//! 2. Opens a handler transaction.
//! 3. Dedupes against the inbox; a prior row means the event was already
//!    processed and the delivery is acked as `duplicate`.
//! 4. Runs the registered [`EventHandler`] with the event and the
//!    transactional store handle. Handlers may read and write any rows in
//!    the same transaction, including the outbox (event chaining).
//! 5. Commits, inserting the inbox row in the same commit, which is the
//!    point after which side effects become non-replayable.
//!
//! Failures are classified, never propagated raw: `transient` retries with
//! jittered exponential backoff up to `MAX_RETRIES`, everything else (and
//! the retry budget running out) dead-letters the event and the partition
//! moves on.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod handler;
pub mod locks;
pub mod runtime;

pub use handler::{EventHandler, HandlerError};
pub use locks::EntityLockMap;
pub use runtime::{Consumer, ConsumerHandle, Outcome};
