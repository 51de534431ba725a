//! # Fleet Polling Loop
//!
//! One cycle polls every configured miner through a bounded worker pool
//! and hands the batch to the uploader. The schedule runs every `T`
//! seconds with ±jitter (spreading cycles so a thousand sites don't hit
//! their miners in lockstep), coalesces (a new cycle never starts while
//! the previous one runs), and kills stragglers at a `5·T` deadline.

use crate::client::CgMinerClient;
use crate::config::MinerTarget;
use crate::normalize::normalize_miner;
use crate::uploader::Uploader;
use rand::Rng;
use shared_types::config::EdgeConfig;
use shared_types::TelemetryRecord;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// The fleet poller.
pub struct MinerPoller {
    client: CgMinerClient,
    miners: Vec<MinerTarget>,
    schedule: EdgeConfig,
}

impl MinerPoller {
    /// Build a poller over a fleet.
    #[must_use]
    pub fn new(client: CgMinerClient, miners: Vec<MinerTarget>, schedule: EdgeConfig) -> Self {
        Self { client, miners, schedule }
    }

    /// Poll one miner: `summary` decides liveness, `stats`/`pools`/`version`
    /// enrich. A miner that answers nothing becomes an offline record.
    pub async fn poll_one(&self, target: &MinerTarget) -> TelemetryRecord {
        let summary = match self.client.request(&target.addr, "summary", "").await {
            Ok(value) => value,
            Err(err) => {
                debug!(miner = %target.id, addr = %target.addr, %err, "Miner unreachable");
                return TelemetryRecord::offline(
                    target.id.clone(),
                    format!("{}: {err}", err.class()),
                );
            }
        };

        let stats = self.client.request(&target.addr, "stats", "").await.ok();
        let pools = self.client.request(&target.addr, "pools", "").await.ok();
        let version = self.client.request(&target.addr, "version", "").await.ok();

        normalize_miner(
            target.id.clone(),
            Some(&summary),
            stats.as_ref(),
            pools.as_ref(),
            version.as_ref(),
        )
    }

    /// Run one full fleet cycle through the worker pool.
    pub async fn poll_fleet(self: &Arc<Self>) -> Vec<TelemetryRecord> {
        let semaphore = Arc::new(Semaphore::new(self.schedule.workers.max(1)));
        let mut join_set = JoinSet::new();

        for target in self.miners.clone() {
            let poller = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return TelemetryRecord::offline(target.id.clone(), "worker pool closed");
                };
                poller.poll_one(&target).await
            });
        }

        let mut records = Vec::with_capacity(self.miners.len());
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(record) => records.push(record),
                Err(err) => warn!(%err, "Polling task panicked"),
            }
        }
        records
    }

    /// Spawn the scheduling loop feeding the uploader.
    #[must_use]
    pub fn start(self: Arc<Self>, uploader: Arc<Uploader>) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.schedule.poll_interval;
        let jitter = self.schedule.jitter;

        let task = tokio::spawn(async move {
            info!(
                miners = self.miners.len(),
                interval_s = interval.as_secs(),
                jitter_s = jitter.as_secs(),
                "Edge poller started"
            );
            loop {
                // T ± jitter; awaiting the cycle inline gives coalescing
                // for free (a cycle can never overlap itself).
                let spread = if jitter.is_zero() {
                    interval
                } else {
                    let low = interval.saturating_sub(jitter);
                    let span = (2 * jitter).as_millis() as u64;
                    low + std::time::Duration::from_millis(
                        rand::thread_rng().gen_range(0..=span),
                    )
                };
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    () = tokio::time::sleep(spread) => {}
                }

                let deadline = interval * 5;
                let cycle = async {
                    let records = self.poll_fleet().await;
                    let online = records.iter().filter(|r| r.is_online()).count();
                    debug!(total = records.len(), online, "Cycle complete");
                    uploader.upload_batch(records).await
                };
                match tokio::time::timeout(deadline, cycle).await {
                    Ok(stats) => {
                        if stats.dropped > 0 {
                            warn!(dropped = stats.dropped, "Cycle dropped records");
                        }
                    }
                    Err(_) => warn!(
                        deadline_s = deadline.as_secs(),
                        "Cycle exceeded deadline, stragglers cancelled"
                    ),
                }
            }
            info!("Edge poller stopped");
        });

        PollerHandle { shutdown: shutdown_tx, task }
    }
}

/// Handle to the running polling loop.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop the loop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
