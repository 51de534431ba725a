//! # Message Bus
//!
//! Topics, partitions and group registration. See the crate docs for the
//! delivery contracts.

use crate::delivery::{GroupSubscription, PartitionQueue, QueuedMessage};
use crate::{PublishError, DEFAULT_PARTITION_CAPACITY};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::EventEnvelope;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Trait for publishing envelopes to the transport.
///
/// The CDC publisher holds this, not the concrete bus, so a brokered
/// transport can be swapped in without touching the publisher.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish one envelope to `topic`. Returns the number of consumer
    /// groups that received it.
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<usize, PublishError>;
}

struct GroupState {
    partitions: Vec<Arc<PartitionQueue>>,
}

struct Topic {
    partition_count: usize,
    capacity: usize,
    groups: RwLock<HashMap<String, Arc<GroupState>>>,
}

/// In-process implementation of the transport.
pub struct MessageBus {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    /// Total envelopes accepted across topics.
    published: AtomicU64,
}

impl MessageBus {
    /// Create a bus with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            published: AtomicU64::new(0),
        }
    }

    /// Declare a topic with `partitions` partitions. Idempotent; repeated
    /// declarations keep the first partition count.
    pub fn create_topic(&self, name: &str, partitions: usize) {
        self.create_topic_with_capacity(name, partitions, DEFAULT_PARTITION_CAPACITY);
    }

    /// Declare a topic with an explicit per-partition queue capacity.
    pub fn create_topic_with_capacity(&self, name: &str, partitions: usize, capacity: usize) {
        let mut topics = self.topics.write();
        topics.entry(name.to_string()).or_insert_with(|| {
            debug!(topic = name, partitions, "Topic created");
            Arc::new(Topic {
                partition_count: partitions.max(1),
                capacity,
                groups: RwLock::new(HashMap::new()),
            })
        });
    }

    /// Register (or re-attach to) a consumer group on a topic.
    ///
    /// Messages published before any group is registered are not retained
    /// for it; groups subscribe at process start, before the publisher runs.
    pub fn subscribe(&self, group: &str, topic: &str) -> Result<GroupSubscription, PublishError> {
        let topics = self.topics.read();
        let t = topics
            .get(topic)
            .ok_or_else(|| PublishError::TopicMissing(topic.to_string()))?;

        let mut groups = t.groups.write();
        let state = groups.entry(group.to_string()).or_insert_with(|| {
            debug!(topic, group, "Consumer group registered");
            Arc::new(GroupState {
                partitions: (0..t.partition_count)
                    .map(|_| Arc::new(PartitionQueue::new(t.capacity)))
                    .collect(),
            })
        });

        Ok(GroupSubscription::new(
            topic.to_string(),
            group.to_string(),
            state.partitions.clone(),
        ))
    }

    /// Total envelopes accepted since construction.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Undelivered message count for one group on one topic.
    #[must_use]
    pub fn group_lag(&self, topic: &str, group: &str) -> usize {
        let topics = self.topics.read();
        let Some(t) = topics.get(topic) else { return 0 };
        let groups = t.groups.read();
        let Some(state) = groups.get(group) else { return 0 };
        state.partitions.iter().map(|p| p.depth()).sum()
    }

    /// Undelivered message count summed over every topic and group.
    #[must_use]
    pub fn total_lag(&self) -> usize {
        let topics = self.topics.read();
        topics
            .values()
            .map(|t| {
                let groups = t.groups.read();
                groups
                    .values()
                    .map(|g| g.partitions.iter().map(|p| p.depth()).sum::<usize>())
                    .sum::<usize>()
            })
            .sum()
    }

    fn partition_for(key: &str, partition_count: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % partition_count
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MessageBus {
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<usize, PublishError> {
        let t = {
            let topics = self.topics.read();
            topics
                .get(topic)
                .cloned()
                .ok_or_else(|| PublishError::TopicMissing(topic.to_string()))?
        };

        let key = envelope.partition_key();
        let partition = Self::partition_for(&key, t.partition_count);

        let groups = t.groups.read();
        if groups.is_empty() {
            // No consumers registered; the event is not retained. The
            // publisher still counts this as delivered.
            warn!(topic, key = %key, "Envelope dropped (no consumer groups)");
            self.published.fetch_add(1, Ordering::Relaxed);
            return Ok(0);
        }

        // All-or-nothing across groups: probe capacity first so a full
        // queue in one group doesn't half-deliver the envelope.
        for (name, state) in groups.iter() {
            if state.partitions[partition].is_full() {
                return Err(PublishError::Backpressure {
                    topic: topic.to_string(),
                    group: name.clone(),
                    partition,
                });
            }
        }

        for state in groups.values() {
            state.partitions[partition].push_back(QueuedMessage {
                envelope: envelope.clone(),
                attempt: 1,
            });
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            topic,
            partition,
            key = %key,
            groups = groups.len(),
            "Envelope published"
        );
        Ok(groups.len())
    }
}
