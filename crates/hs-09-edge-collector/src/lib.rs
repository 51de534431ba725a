//! # Edge Collector - On-Prem Mining Agent
//!
//! The agent deployed inside a mining farm. Four cooperating pieces:
//!
//! - [`client`]: the hardened CGMiner TCP client (port 4028, NUL-terminated
//!   JSON, strict timeouts, bounded retries, 1 MiB response cap).
//! - [`normalize`]: merges `summary` + `stats` + `pools` responses into one
//!   [`shared_types::TelemetryRecord`] per miner.
//! - [`poller`]: the jittered, coalescing scheduling loop driving a worker
//!   pool over the fleet.
//! - [`uploader`]: batches records, gzips large bodies, uploads with
//!   rate-limit backoff and poison-isolation splitting.
//! - [`commands`]: long-polls for signed commands, verifies each HMAC
//!   before execution, reports per-miner results with the echoed nonce.
//!
//! The agent holds no persistent state beyond its credentials; everything
//! else is rebuilt from the fleet each cycle.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod commands;
pub mod config;
pub mod normalize;
pub mod poller;
pub mod uploader;

pub use client::{CgMinerClient, CgMinerError, ClientConfig, EXEC_WHITELIST, POLL_WHITELIST};
pub use commands::CommandRunner;
pub use config::EdgeCollectorConfig;
pub use normalize::normalize_miner;
pub use poller::MinerPoller;
pub use uploader::{HttpIngestClient, IngestApi, UploadAck, UploadError, Uploader};
