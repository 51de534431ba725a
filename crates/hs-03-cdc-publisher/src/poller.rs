//! The outbox poller service.

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::router::route_topic;
use chrono::Utc;
use rand::Rng;
use shared_bus::{PublishError, Transport};
use shared_store::Store;
use shared_types::config::OutboxConfig;
use shared_types::EventEnvelope;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Backoff base for transient transport errors.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Backoff ceiling.
const BACKOFF_MAX: Duration = Duration::from_secs(60);
/// Jitter applied to every backoff, as a fraction of the delay.
const BACKOFF_JITTER: f64 = 0.2;

/// Apply `±frac` multiplicative jitter to a duration.
fn jittered(base: Duration, frac: f64) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-frac..=frac);
    base.mul_f64(factor.max(0.0))
}

/// The CDC publisher in poller mode.
pub struct OutboxPublisher {
    store: Store,
    transport: Arc<dyn Transport>,
    config: OutboxConfig,
    breaker: CircuitBreaker,
}

impl OutboxPublisher {
    /// Create a publisher with the default breaker configuration.
    #[must_use]
    pub fn new(store: Store, transport: Arc<dyn Transport>, config: OutboxConfig) -> Self {
        Self::with_breaker(store, transport, config, CircuitBreakerConfig::default())
    }

    /// Create a publisher with an explicit breaker configuration.
    #[must_use]
    pub fn with_breaker(
        store: Store,
        transport: Arc<dyn Transport>,
        config: OutboxConfig,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            breaker: CircuitBreaker::new(breaker),
        }
    }

    /// The breaker, for health reporting.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Publish one batch of unpublished rows in `created_at` order.
    ///
    /// Each row is stamped `published_at` individually, after its transport
    /// ack. The first failure stops the batch so order is preserved; rows
    /// already acked stay stamped, the failing row stays first in line.
    pub async fn publish_batch(&self) -> Result<usize, PublishError> {
        let batch = self
            .store
            .read(|t| t.outbox_unpublished(self.config.batch_size));
        if batch.is_empty() {
            return Ok(0);
        }

        let mut published = 0usize;
        for row in batch {
            let topic = route_topic(&row.kind);
            let envelope = EventEnvelope {
                event_id: row.id,
                kind: row.kind.clone(),
                tenant_id: row.tenant_id.clone(),
                entity_id: row.entity_id.clone(),
                created_at: row.created_at,
                payload: row.payload.clone(),
                replayed: false,
            };

            match self.transport.publish(topic, envelope).await {
                Ok(receivers) => {
                    self.breaker.record_success();
                    if let Err(err) = self
                        .store
                        .transact(|txn| txn.mark_published(row.id, Utc::now()))
                    {
                        // The row was delivered but not stamped; it will be
                        // republished and deduped by consumers.
                        error!(event_id = %row.id, %err, "Failed to stamp published_at");
                    }
                    published += 1;
                    debug!(event_id = %row.id, topic, receivers, "Outbox row published");
                }
                Err(err) => {
                    self.breaker.record_failure(!err.is_transient());
                    warn!(event_id = %row.id, topic, %err, "Publish failed, halting batch");
                    return Err(err);
                }
            }
        }
        Ok(published)
    }

    /// Spawn the polling loop. Returns a handle that stops it.
    #[must_use]
    pub fn start(self: Arc<Self>) -> PublisherHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let poll_interval = self.config.poll_interval;

        let task = tokio::spawn(async move {
            info!(
                interval_ms = poll_interval.as_millis() as u64,
                batch = self.config.batch_size,
                "CDC publisher started"
            );
            let mut consecutive_failures = 0u32;
            loop {
                let delay = if consecutive_failures == 0 {
                    poll_interval
                } else {
                    let exp = BACKOFF_BASE.saturating_mul(1u32 << consecutive_failures.min(6));
                    jittered(exp.min(BACKOFF_MAX), BACKOFF_JITTER)
                };

                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    () = tokio::time::sleep(delay) => {}
                }

                if !self.breaker.should_allow() {
                    continue;
                }

                match self.publish_batch().await {
                    Ok(_) => consecutive_failures = 0,
                    Err(err) if err.is_transient() => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                    }
                    Err(_) => {
                        // Permanent: the breaker is open; pace probes by the
                        // normal poll interval.
                        consecutive_failures = 0;
                    }
                }
            }
            info!("CDC publisher stopped");
        });

        PublisherHandle { shutdown: shutdown_tx, task }
    }
}

/// Handle to a running publisher loop.
pub struct PublisherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    /// Stop the loop and wait for it to finish. Idempotent under task
    /// failure: an already-dead loop just returns.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
