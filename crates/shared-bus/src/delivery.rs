//! # Deliveries and Group Subscriptions
//!
//! The consuming side of the bus. A [`GroupSubscription`] hands out
//! [`Delivery`] values one at a time per partition; the delivery must be
//! acked to advance, and anything not acked goes back to the front of its
//! partition so order is preserved across worker crashes and rebalances.

use parking_lot::Mutex;
use shared_types::EventEnvelope;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// A message sitting in a partition queue.
pub(crate) struct QueuedMessage {
    pub envelope: EventEnvelope,
    pub attempt: u32,
}

/// One FIFO partition owned by a consumer group.
pub(crate) struct PartitionQueue {
    queue: Mutex<VecDeque<QueuedMessage>>,
    notify: Notify,
    capacity: usize,
}

impl PartitionQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.queue.lock().len() >= self.capacity
    }

    pub(crate) fn depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn push_back(&self, msg: QueuedMessage) {
        self.queue.lock().push_back(msg);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    fn push_front(&self, msg: QueuedMessage) {
        self.queue.lock().push_front(msg);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    fn pop_front(&self) -> Option<QueuedMessage> {
        self.queue.lock().pop_front()
    }
}

/// A consumer group's attachment to one topic.
pub struct GroupSubscription {
    topic: String,
    group: String,
    partitions: Vec<Arc<PartitionQueue>>,
}

impl GroupSubscription {
    pub(crate) fn new(topic: String, group: String, partitions: Vec<Arc<PartitionQueue>>) -> Self {
        Self { topic, group, partitions }
    }

    /// Number of partitions on this topic.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Undelivered messages on one partition.
    #[must_use]
    pub fn depth(&self, partition: usize) -> usize {
        self.partitions[partition].depth()
    }

    /// Topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Group name.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Await the next delivery on `partition`.
    ///
    /// Each partition is meant to be driven by exactly one worker task at a
    /// time; that is what serializes processing within a partition.
    pub async fn next(&self, partition: usize) -> Delivery {
        let queue = Arc::clone(&self.partitions[partition]);
        loop {
            if let Some(msg) = queue.pop_front() {
                return Delivery {
                    envelope: msg.envelope,
                    attempt: msg.attempt,
                    queue,
                    settled: false,
                };
            }
            queue.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`GroupSubscription::next`].
    #[must_use]
    pub fn try_next(&self, partition: usize) -> Option<Delivery> {
        let queue = Arc::clone(&self.partitions[partition]);
        queue.pop_front().map(|msg| Delivery {
            envelope: msg.envelope,
            attempt: msg.attempt,
            queue,
            settled: false,
        })
    }
}

/// An owned, in-flight message.
///
/// Exactly one of [`Delivery::ack`] or [`Delivery::nack`] should be called.
/// Dropping an unsettled delivery requeues it at the front of its partition
/// (at-least-once on worker death).
pub struct Delivery {
    pub envelope: EventEnvelope,
    /// 1 on first delivery, incremented per redelivery.
    pub attempt: u32,
    queue: Arc<PartitionQueue>,
    settled: bool,
}

impl Delivery {
    /// Acknowledge: the message is done and will not be redelivered.
    pub fn ack(mut self) {
        self.settled = true;
    }

    /// Negative-acknowledge: requeue at the front of the partition with the
    /// attempt counter bumped. The caller owns any backoff delay; nothing
    /// else can be consumed from this partition's worker in the meantime,
    /// so order is preserved.
    pub fn nack(mut self) {
        self.settled = true;
        debug!(
            event_id = %self.envelope.event_id,
            attempt = self.attempt,
            "Delivery nacked, requeued at front"
        );
        self.queue.push_front(QueuedMessage {
            envelope: self.envelope.clone(),
            attempt: self.attempt + 1,
        });
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            self.queue.push_front(QueuedMessage {
                envelope: self.envelope.clone(),
                attempt: self.attempt + 1,
            });
        }
    }
}
