//! # Core Configuration
//!
//! Every recognized tunable, read once from the environment at process
//! start and passed down explicitly. No component reads `env::var` on its
//! own.
//!
//! | Variable | Default | Governs |
//! |----------|---------|---------|
//! | `DATABASE_URL` | `memory://` | store backend |
//! | `SESSION_SECRET` | random-per-boot | session auth surface |
//! | `MAX_PAYLOAD_SIZE` | `10485760` | decompressed upload bytes |
//! | `MAX_MINERS_PER_UPLOAD` | `5000` | records per batch |
//! | `MAX_REQUEST_RATE` | `60` | uploads per key per minute |
//! | `CONSUMER_MAX_RETRIES` | `3` | retries before DLQ |
//! | `CONSUMER_BACKOFF_BASE_MS` | `1000` | retry backoff base |
//! | `OUTBOX_POLL_INTERVAL_MS` | `5000` | publisher poll period |
//! | `OUTBOX_BATCH` | `100` | publisher batch size |
//! | `EDGE_POLL_INTERVAL_S` | `60` | edge scheduling period |
//! | `EDGE_JITTER_S` | `10` | edge scheduling jitter |
//! | `EDGE_WORKERS` | `20` | edge polling concurrency |
//! | `COMMAND_TTL_MIN` | `30` | default command TTL |

use std::env;
use std::time::Duration;

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Ingest API limits (C7).
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Decompressed upload size cap in bytes.
    pub max_payload_size: u64,
    /// Records per batch cap.
    pub max_miners_per_upload: usize,
    /// Accepted uploads per key per sliding 60 s window.
    pub max_request_rate: u32,
    /// The sliding window itself.
    pub rate_window: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 10 * 1024 * 1024,
            max_miners_per_upload: 5000,
            max_request_rate: 60,
            rate_window: Duration::from_secs(60),
        }
    }
}

/// Consumer runtime knobs (C5).
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Retries before a failing event is dead-lettered.
    pub max_retries: u32,
    /// Base for exponential retry backoff.
    pub backoff_base: Duration,
    /// Per-entity lock TTL.
    pub entity_lock_ttl: Duration,
    /// Bounded prefetch / cross-partition worker cap.
    pub worker_slots: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(1000),
            entity_lock_ttl: Duration::from_secs(60),
            worker_slots: 32,
        }
    }
}

/// CDC publisher knobs (C3).
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Poll period.
    pub poll_interval: Duration,
    /// Rows per poll.
    pub batch_size: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            batch_size: 100,
        }
    }
}

/// Edge collector knobs (C9).
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Scheduling period.
    pub poll_interval: Duration,
    /// Scheduling jitter, ± applied per cycle.
    pub jitter: Duration,
    /// Miner polling concurrency.
    pub workers: usize,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            jitter: Duration::from_secs(10),
            workers: 20,
        }
    }
}

/// Command queue knobs (C8).
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Default TTL for new commands.
    pub default_ttl: chrono::Duration,
    /// Commands returned per fetch.
    pub fetch_limit: usize,
    /// A running command unreported for `5 * ttl` reverts to queued...
    pub running_timeout_factor: i32,
    /// ...at most this many times.
    pub max_refetch: u32,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            default_ttl: chrono::Duration::minutes(30),
            fetch_limit: 32,
            running_timeout_factor: 5,
            max_refetch: 3,
        }
    }
}

/// Top-level configuration for the control plane and edge.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub database_url: Option<String>,
    pub session_secret: Option<String>,
    pub ingest: IngestConfig,
    pub consumer: ConsumerConfig,
    pub outbox: OutboxConfig,
    pub edge: EdgeConfig,
    pub command: CommandConfig,
}

impl CoreConfig {
    /// Read the recognized environment variables, falling back to the
    /// documented defaults on absence or parse failure.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self {
            database_url: env::var("DATABASE_URL").ok(),
            session_secret: env::var("SESSION_SECRET").ok(),
            ..Self::default()
        };

        cfg.ingest.max_payload_size = env_u64("MAX_PAYLOAD_SIZE", cfg.ingest.max_payload_size);
        cfg.ingest.max_miners_per_upload =
            env_u64("MAX_MINERS_PER_UPLOAD", cfg.ingest.max_miners_per_upload as u64) as usize;
        cfg.ingest.max_request_rate = env_u32("MAX_REQUEST_RATE", cfg.ingest.max_request_rate);

        cfg.consumer.max_retries = env_u32("CONSUMER_MAX_RETRIES", cfg.consumer.max_retries);
        cfg.consumer.backoff_base = Duration::from_millis(env_u64(
            "CONSUMER_BACKOFF_BASE_MS",
            cfg.consumer.backoff_base.as_millis() as u64,
        ));

        cfg.outbox.poll_interval = Duration::from_millis(env_u64(
            "OUTBOX_POLL_INTERVAL_MS",
            cfg.outbox.poll_interval.as_millis() as u64,
        ));
        cfg.outbox.batch_size = env_u64("OUTBOX_BATCH", cfg.outbox.batch_size as u64) as usize;

        cfg.edge.poll_interval =
            Duration::from_secs(env_u64("EDGE_POLL_INTERVAL_S", cfg.edge.poll_interval.as_secs()));
        cfg.edge.jitter = Duration::from_secs(env_u64("EDGE_JITTER_S", cfg.edge.jitter.as_secs()));
        cfg.edge.workers = env_u64("EDGE_WORKERS", cfg.edge.workers as u64) as usize;

        cfg.command.default_ttl = chrono::Duration::minutes(env_u64(
            "COMMAND_TTL_MIN",
            cfg.command.default_ttl.num_minutes() as u64,
        ) as i64);

        cfg
    }
}
