//! # Shared Bus - Event Transport Between Publisher and Consumers
//!
//! An ordered, partitioned, at-least-once pub/sub fabric. The CDC publisher
//! is the only producer; consumer groups compete for deliveries.
//!
//! ## Contracts
//!
//! - **Per-partition order.** A message's partition is chosen by hashing its
//!   partition key (`tenant_id:entity_id`); messages with equal keys land on
//!   the same partition FIFO and are handed out in publish order.
//! - **At-least-once.** A delivery stays owned by its receiver until acked.
//!   Nacking (or dropping the delivery without acking) requeues it at the
//!   front of its partition, so redelivery cannot reorder.
//! - **Backpressure, not loss.** Partition queues are bounded; a full queue
//!   rejects the publish with a transient error instead of dropping.
//!
//! Any transport preserving these contracts can replace this one behind the
//! [`Transport`] trait; this in-process implementation is what single-node
//! deployments and the test suite run on.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod bus;
pub mod delivery;

// Re-export main types
pub use bus::{MessageBus, Transport};
pub use delivery::{Delivery, GroupSubscription};

use thiserror::Error;

/// Default partitions per topic.
pub const DEFAULT_PARTITIONS: usize = 3;

/// Maximum queued deliveries per (group, partition) before backpressure.
pub const DEFAULT_PARTITION_CAPACITY: usize = 1000;

/// Errors from publishing to the transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The topic was never created. Permanent: retrying cannot help.
    #[error("Topic not found: {0}")]
    TopicMissing(String),

    /// A subscriber group's partition queue is full. Transient: the
    /// publisher should back off and retry without advancing.
    #[error("Partition {partition} of {topic} at capacity for group {group}")]
    Backpressure {
        topic: String,
        group: String,
        partition: usize,
    },
}

impl PublishError {
    /// Whether backing off and retrying can succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }
}
