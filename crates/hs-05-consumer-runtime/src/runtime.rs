//! The consumer worker loop.

use crate::handler::{EventHandler, HandlerError};
use crate::locks::EntityLockMap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hs_telemetry::metrics::{EVENTS_CONSUMED, HANDLER_DURATION, WRITE_TO_VISIBLE};
use rand::Rng;
use sha2::{Digest, Sha256};
use shared_bus::{Delivery, GroupSubscription};
use shared_store::{DlqRow, InboxRow, Store, StoreError};
use shared_types::config::ConsumerConfig;
use shared_types::{EventEnvelope, EventId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Redelivery pause after a lock-busy skip.
const LOCK_BUSY_DELAY: Duration = Duration::from_millis(50);
/// Jitter applied to retry backoff.
const RETRY_JITTER: f64 = 0.2;

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handler ran and committed.
    Processed,
    /// Inbox row already existed; no side effects.
    Duplicate,
    /// Retries exhausted or non-retryable failure; DLQ row written.
    DeadLettered,
    /// Another worker holds the entity lock; delivery requeued.
    LockBusy,
}

enum Attempt {
    Processed { handler_ms: u64 },
    Duplicate,
}

struct RetryState {
    failures: u32,
    first_failed_at: DateTime<Utc>,
}

/// One consumer group bound to one handler.
pub struct Consumer {
    name: String,
    store: Store,
    handler: Arc<dyn EventHandler>,
    locks: Arc<EntityLockMap>,
    config: ConsumerConfig,
    retry_state: DashMap<EventId, RetryState>,
    latency: Option<Arc<hs_telemetry::LatencyTracker>>,
}

impl Consumer {
    /// Build a consumer. The lock map may be shared with other consumers of
    /// the same store.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        store: Store,
        handler: Arc<dyn EventHandler>,
        config: ConsumerConfig,
    ) -> Self {
        let locks = Arc::new(EntityLockMap::new(config.entity_lock_ttl));
        Self {
            name: name.into(),
            store,
            handler,
            locks,
            config,
            retry_state: DashMap::new(),
            latency: None,
        }
    }

    /// Attach a latency tracker sampling write-to-visible times for the
    /// health surface.
    #[must_use]
    pub fn with_latency_tracker(mut self, tracker: Arc<hs_telemetry::LatencyTracker>) -> Self {
        self.latency = Some(tracker);
        self
    }

    /// Consumer group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entity lock map, exposed for tests simulating rebalances.
    #[must_use]
    pub fn locks(&self) -> &Arc<EntityLockMap> {
        &self.locks
    }

    /// Process one delivery to completion: commit, duplicate-ack, or DLQ.
    ///
    /// Transient failures are retried in-line with jittered exponential
    /// backoff; the partition stays serialized through the retries, and only
    /// a dead-lettered event lets it advance past a failure.
    pub async fn process_delivery(&self, delivery: Delivery) -> Outcome {
        let envelope = delivery.envelope.clone();
        let key = envelope.partition_key();

        let Some(_lock) = self.locks.try_acquire(&key) else {
            EVENTS_CONSUMED
                .with_label_values(&[self.name.as_str(), "lock_busy"])
                .inc();
            self.locks.sweep();
            debug!(consumer = %self.name, key = %key, "Entity lock busy, requeueing");
            delivery.nack();
            return Outcome::LockBusy;
        };

        loop {
            match self.attempt(&envelope) {
                Ok(Attempt::Processed { handler_ms }) => {
                    self.retry_state.remove(&envelope.event_id);
                    EVENTS_CONSUMED.with_label_values(&[self.name.as_str(), "ok"]).inc();
                    HANDLER_DURATION
                        .with_label_values(&[self.name.as_str()])
                        .observe(handler_ms as f64 / 1000.0);
                    let visible = (Utc::now() - envelope.created_at)
                        .to_std()
                        .unwrap_or_default();
                    WRITE_TO_VISIBLE.observe(visible.as_secs_f64());
                    if let Some(tracker) = &self.latency {
                        tracker.record(visible);
                    }
                    delivery.ack();
                    return Outcome::Processed;
                }
                Ok(Attempt::Duplicate) => {
                    EVENTS_CONSUMED
                        .with_label_values(&[self.name.as_str(), "duplicate"])
                        .inc();
                    debug!(consumer = %self.name, event_id = %envelope.event_id, "Duplicate delivery");
                    delivery.ack();
                    return Outcome::Duplicate;
                }
                Err(err) => {
                    let (failures, first_failed_at) = {
                        let mut state = self
                            .retry_state
                            .entry(envelope.event_id)
                            .or_insert_with(|| RetryState {
                                failures: 0,
                                first_failed_at: Utc::now(),
                            });
                        state.failures += 1;
                        (state.failures, state.first_failed_at)
                    };

                    if err.is_retryable() && failures <= self.config.max_retries {
                        EVENTS_CONSUMED
                            .with_label_values(&[self.name.as_str(), "retried"])
                            .inc();
                        let delay = self.backoff_delay(failures);
                        warn!(
                            consumer = %self.name,
                            event_id = %envelope.event_id,
                            attempt = failures,
                            delay_ms = delay.as_millis() as u64,
                            %err,
                            "Handler failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    self.dead_letter(&envelope, &err, failures, first_failed_at);
                    self.retry_state.remove(&envelope.event_id);
                    EVENTS_CONSUMED.with_label_values(&[self.name.as_str(), "dlq"]).inc();
                    delivery.ack();
                    return Outcome::DeadLettered;
                }
            }
        }
    }

    /// One handler transaction: dedupe, handle, mark consumed.
    fn attempt(&self, envelope: &EventEnvelope) -> Result<Attempt, HandlerError> {
        let digest = hex::encode(Sha256::digest(envelope.payload.to_string().as_bytes()));
        let started = Instant::now();

        let result = self.store.transact(|txn| {
            if txn.inbox_contains(&self.name, envelope.event_id) {
                return Ok(Attempt::Duplicate);
            }

            self.handler
                .handle(envelope, txn)
                .map_err(|err| StoreError::Aborted(err.into()))?;

            let handler_ms = started.elapsed().as_millis() as u64;
            txn.insert_inbox(InboxRow {
                consumer_name: self.name.clone(),
                event_id: envelope.event_id,
                event_kind: envelope.kind.clone(),
                consumed_at: Utc::now(),
                processing_duration_ms: handler_ms,
                payload_digest: digest.clone(),
            })?;
            Ok(Attempt::Processed { handler_ms })
        });

        result.map_err(HandlerError::from)
    }

    /// Write the DLQ row. Failure to record is logged, never raised; the
    /// partition must advance regardless.
    fn dead_letter(
        &self,
        envelope: &EventEnvelope,
        err: &HandlerError,
        failures: u32,
        first_failed_at: DateTime<Utc>,
    ) {
        let row = DlqRow {
            id: Uuid::new_v4(),
            consumer_name: self.name.clone(),
            event_id: envelope.event_id,
            event_kind: envelope.kind.clone(),
            payload: serde_json::to_value(envelope).unwrap_or_default(),
            error_kind: err.kind(),
            error_detail: err.to_string(),
            retry_count: failures.saturating_sub(1),
            first_failed_at,
            last_failed_at: Utc::now(),
            replayed: false,
            replayed_at: None,
        };
        warn!(
            consumer = %self.name,
            event_id = %envelope.event_id,
            kind = %envelope.kind,
            error_kind = ?err.kind(),
            "Event dead-lettered"
        );
        if let Err(store_err) = self.store.transact(|txn| {
            txn.insert_dlq(row.clone());
            Ok(())
        }) {
            tracing::error!(%store_err, event_id = %envelope.event_id, "Failed to write DLQ row");
        }
    }

    fn backoff_delay(&self, failures: u32) -> Duration {
        let exp = self
            .config
            .backoff_base
            .saturating_mul(1u32 << (failures - 1).min(6));
        let factor = 1.0 + rand::thread_rng().gen_range(-RETRY_JITTER..=RETRY_JITTER);
        exp.mul_f64(factor.max(0.0))
    }

    /// Spawn one worker task per partition. Within a partition deliveries
    /// are strictly serialized; across partitions concurrency is bounded by
    /// `worker_slots`.
    #[must_use]
    pub fn start(self: Arc<Self>, subscription: GroupSubscription) -> ConsumerHandle {
        let subscription = Arc::new(subscription);
        let semaphore = Arc::new(Semaphore::new(self.config.worker_slots));
        let (shutdown_tx, _) = watch::channel(false);
        let mut tasks = Vec::new();

        info!(
            consumer = %self.name,
            topic = subscription.topic(),
            partitions = subscription.partition_count(),
            "Consumer started"
        );

        for partition in 0..subscription.partition_count() {
            let consumer = Arc::clone(&self);
            let sub = Arc::clone(&subscription);
            let sem = Arc::clone(&semaphore);
            let mut shutdown_rx = shutdown_tx.subscribe();

            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        delivery = sub.next(partition) => {
                            let Ok(_permit) = sem.acquire().await else { break };
                            let outcome = consumer.process_delivery(delivery).await;
                            if outcome == Outcome::LockBusy {
                                tokio::time::sleep(LOCK_BUSY_DELAY).await;
                            }
                        }
                    }
                }
            }));
        }

        ConsumerHandle { shutdown: shutdown_tx, tasks }
    }
}

/// Handle to a running consumer's partition tasks.
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Stop every partition task and wait for them. Idempotent.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
