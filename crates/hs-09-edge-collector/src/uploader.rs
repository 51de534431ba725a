//! # Batch Upload Path
//!
//! Records accumulate per polling cycle into one batch. Upload semantics:
//!
//! - bodies over 16 KiB are gzip-compressed;
//! - `429` sleeps `Retry-After` (plus jitter) and retries, three times;
//! - `validation_failed` splits the batch in half and retries each half
//!   down to singletons (poison isolation); a singleton that still fails
//!   is dropped and logged;
//! - transport errors retry with backoff, then drop the batch (telemetry
//!   is periodic; the next cycle supersedes it).
//!
//! The server is reached through the [`IngestApi`] port so tests (and the
//! integration suite) can run the whole path in-process.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use rand::Rng;
use shared_types::{CommandId, CommandResultReport, PendingCommand, TelemetryRecord};
use std::collections::VecDeque;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Compress upload bodies above this size.
pub const GZIP_THRESHOLD: usize = 16 * 1024;

/// Retries for rate-limited and transport-failed uploads.
const UPLOAD_RETRIES: u32 = 3;

/// Errors surfaced by the ingest API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("validation failed at {field}")]
    ValidationFailed { field: String },

    #[error("payload too large")]
    TooLarge,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("replay rejected")]
    Replay,

    #[error("transport: {0}")]
    Transport(String),
}

/// Server acknowledgment of an accepted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadAck {
    pub processed: usize,
    pub online: usize,
    pub offline: usize,
}

/// The edge's view of the cloud.
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Upload one telemetry batch.
    async fn upload(&self, records: &[TelemetryRecord]) -> Result<UploadAck, UploadError>;

    /// Long-poll for pending commands.
    async fn fetch_commands(&self, wait: Duration) -> Result<Vec<PendingCommand>, UploadError>;

    /// Report results for one command.
    async fn report_result(
        &self,
        id: CommandId,
        report: &CommandResultReport,
    ) -> Result<(), UploadError>;
}

/// Reqwest-backed implementation against the collector ingest API.
pub struct HttpIngestClient {
    base_url: String,
    collector_key: String,
    device_id: String,
    http: reqwest::Client,
}

impl HttpIngestClient {
    /// Build the client. `base_url` has no trailing slash.
    pub fn new(
        base_url: impl Into<String>,
        collector_key: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| UploadError::Transport(err.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            collector_key: collector_key.into(),
            device_id: device_id.into(),
            http,
        })
    }

    fn classify_status(status: reqwest::StatusCode, body: &serde_json::Value) -> UploadError {
        let detail = body
            .get("detail")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        match status.as_u16() {
            401 => UploadError::Unauthorized,
            403 => UploadError::Forbidden(detail),
            409 => UploadError::Replay,
            413 => UploadError::TooLarge,
            429 => UploadError::RateLimited { retry_after_secs: 1 },
            400 => UploadError::ValidationFailed { field: detail },
            other => UploadError::Transport(format!("status {other}")),
        }
    }
}

#[async_trait]
impl IngestApi for HttpIngestClient {
    async fn upload(&self, records: &[TelemetryRecord]) -> Result<UploadAck, UploadError> {
        let body = serde_json::to_vec(records)
            .map_err(|err| UploadError::Transport(err.to_string()))?;

        let mut request = self
            .http
            .post(format!("{}/collector/upload", self.base_url))
            .header("X-Collector-Key", &self.collector_key)
            .header("Content-Type", "application/json");

        let payload = if body.len() > GZIP_THRESHOLD {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            let compressed = encoder
                .write_all(&body)
                .and_then(|()| encoder.finish())
                .map_err(|err| UploadError::Transport(err.to_string()))?;
            request = request.header("Content-Encoding", "gzip");
            compressed
        } else {
            body
        };

        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(UploadError::RateLimited { retry_after_secs: retry_after });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify_status(status, &body));
        }

        Ok(UploadAck {
            processed: body["processed"].as_u64().unwrap_or(0) as usize,
            online: body["online"].as_u64().unwrap_or(0) as usize,
            offline: body["offline"].as_u64().unwrap_or(0) as usize,
        })
    }

    async fn fetch_commands(&self, wait: Duration) -> Result<Vec<PendingCommand>, UploadError> {
        let response = self
            .http
            .get(format!(
                "{}/collector/commands/pending?wait_ms={}",
                self.base_url,
                wait.as_millis()
            ))
            .header("X-Collector-Key", &self.collector_key)
            .header("X-Edge-Device", &self.device_id)
            // Long-poll read timeout; the server caps its wait at 20 s.
            .timeout(Duration::from_secs(25))
            .send()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify_status(status, &body));
        }

        serde_json::from_value(body["commands"].clone())
            .map_err(|err| UploadError::Transport(err.to_string()))
    }

    async fn report_result(
        &self,
        id: CommandId,
        report: &CommandResultReport,
    ) -> Result<(), UploadError> {
        let response = self
            .http
            .post(format!("{}/collector/commands/{id}/result", self.base_url))
            .header("X-Collector-Key", &self.collector_key)
            .header("X-Edge-Device", &self.device_id)
            .json(report)
            .send()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        Err(Self::classify_status(status, &body))
    }
}

/// Outcome of one batch upload pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub uploaded: usize,
    pub dropped: usize,
    pub requests: usize,
}

/// Drives batches through the ingest API with backoff and poison isolation.
pub struct Uploader {
    api: Arc<dyn IngestApi>,
}

impl Uploader {
    /// Build an uploader over an ingest port.
    #[must_use]
    pub fn new(api: Arc<dyn IngestApi>) -> Self {
        Self { api }
    }

    /// Upload a batch, splitting on validation failures.
    pub async fn upload_batch(&self, records: Vec<TelemetryRecord>) -> UploadStats {
        let mut stats = UploadStats::default();
        let mut queue: VecDeque<Vec<TelemetryRecord>> = VecDeque::new();
        if !records.is_empty() {
            queue.push_back(records);
        }

        while let Some(batch) = queue.pop_front() {
            match self.try_upload(&batch, &mut stats).await {
                Ok(ack) => {
                    debug!(processed = ack.processed, "Batch accepted");
                    stats.uploaded += batch.len();
                }
                Err(UploadError::ValidationFailed { field }) | Err(UploadError::Forbidden(field)) => {
                    if batch.len() > 1 {
                        // Poison isolation: split and retry each half.
                        let mid = batch.len() / 2;
                        let mut left = batch;
                        let right = left.split_off(mid);
                        info!(field = %field, left = left.len(), right = right.len(),
                            "Batch rejected, splitting");
                        queue.push_front(right);
                        queue.push_front(left);
                    } else {
                        warn!(
                            miner = %batch[0].miner_id,
                            field = %field,
                            "Dropping record the server refuses"
                        );
                        stats.dropped += 1;
                    }
                }
                Err(err) => {
                    warn!(%err, count = batch.len(), "Batch dropped after retries");
                    stats.dropped += batch.len();
                }
            }
        }
        stats
    }

    /// One batch with rate-limit and transport retries.
    async fn try_upload(
        &self,
        batch: &[TelemetryRecord],
        stats: &mut UploadStats,
    ) -> Result<UploadAck, UploadError> {
        let mut last = UploadError::Transport("no attempt".into());
        for _ in 0..=UPLOAD_RETRIES {
            stats.requests += 1;
            match self.api.upload(batch).await {
                Ok(ack) => return Ok(ack),
                Err(UploadError::RateLimited { retry_after_secs }) => {
                    let jitter = rand::thread_rng().gen_range(0..=500);
                    let delay =
                        Duration::from_secs(retry_after_secs) + Duration::from_millis(jitter);
                    debug!(delay_ms = delay.as_millis() as u64, "Rate limited, sleeping");
                    tokio::time::sleep(delay).await;
                    last = UploadError::RateLimited { retry_after_secs };
                }
                Err(UploadError::Transport(detail)) => {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    last = UploadError::Transport(detail);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last)
    }
}
