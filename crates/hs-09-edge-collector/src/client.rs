//! # CGMiner TCP Client
//!
//! One hardened client for the CGMiner wire protocol: connect to port 4028,
//! send `{"command":"<cmd>","parameter":"<param>"}` terminated by NUL, read
//! until EOF or NUL, parse JSON.
//!
//! Hardening per request:
//! - connect 2 s, send 1 s, receive 2 s;
//! - up to 3 attempts with `0.5s * 2^n` backoff, ±10 % jitter;
//! - responses over 1 MiB are a `parse` error, never silently truncated;
//! - only whitelisted commands leave the process.
//!
//! Errors classify as `timeout` / `connection` / `dns` / `parse`; only the
//! first two retry.

use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Read-only commands the polling client sends. Anything outside the
/// client's whitelist is rejected locally, never sent.
pub const POLL_WHITELIST: &[&str] = &["summary", "stats", "pools", "devs", "version"];

/// Control commands the command runner's client may send, on top of the
/// read-only set.
pub const EXEC_WHITELIST: &[&str] = &[
    "summary",
    "stats",
    "pools",
    "devs",
    "version",
    "restart",
    "switchpool",
    "enablepool",
    "disablepool",
    "ascset",
];

/// Response size cap.
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Client error classes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CgMinerError {
    /// Connect/send/receive deadline exceeded. Retried.
    #[error("timeout talking to {addr}: {phase}")]
    Timeout { addr: String, phase: &'static str },

    /// TCP-level failure (refused, reset). Retried.
    #[error("connection to {addr} failed: {detail}")]
    Connection { addr: String, detail: String },

    /// Host resolution failed. Not retried.
    #[error("dns resolution failed for {addr}")]
    Dns { addr: String },

    /// Malformed, oversized or non-JSON response. Not retried.
    #[error("unparseable response from {addr}: {detail}")]
    Parse { addr: String, detail: String },

    /// Command not in the whitelist. Never sent.
    #[error("command {0} not whitelisted")]
    Rejected(String),
}

impl CgMinerError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection { .. })
    }

    /// Classification label for logs and results.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Connection { .. } => "connection",
            Self::Dns { .. } => "dns",
            Self::Parse { .. } => "parse",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Per-request deadlines and retry policy.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
    pub attempts: u32,
    pub backoff_base: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(1),
            recv_timeout: Duration::from_secs(2),
            attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// The client. Stateless per request; connections are not pooled (the
/// protocol closes after every response).
#[derive(Debug, Clone)]
pub struct CgMinerClient {
    config: ClientConfig,
    whitelist: &'static [&'static str],
}

impl Default for CgMinerClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl CgMinerClient {
    /// Read-only polling client.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self { config, whitelist: POLL_WHITELIST }
    }

    /// Client with an explicit whitelist (the command runner passes
    /// [`EXEC_WHITELIST`]).
    #[must_use]
    pub fn with_whitelist(config: ClientConfig, whitelist: &'static [&'static str]) -> Self {
        Self { config, whitelist }
    }

    /// Issue one whitelisted command against `addr` (`host:port`).
    pub async fn request(
        &self,
        addr: &str,
        command: &str,
        parameter: &str,
    ) -> Result<serde_json::Value, CgMinerError> {
        if !self.whitelist.contains(&command) {
            return Err(CgMinerError::Rejected(command.to_string()));
        }

        let mut last_err = None;
        for attempt in 0..self.config.attempts {
            if attempt > 0 {
                let exp = self
                    .config
                    .backoff_base
                    .saturating_mul(1u32 << (attempt - 1).min(6));
                let factor: f64 = 1.0 + rand::thread_rng().gen_range(-0.10..=0.10);
                tokio::time::sleep(exp.mul_f64(factor.max(0.0))).await;
            }

            match self.attempt(addr, command, parameter).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    debug!(addr, command, attempt, %err, "Miner request failed, retrying");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        let err = last_err.unwrap_or(CgMinerError::Connection {
            addr: addr.to_string(),
            detail: "no attempts made".into(),
        });
        warn!(addr, command, %err, "Miner request exhausted retries");
        Err(err)
    }

    async fn attempt(
        &self,
        addr: &str,
        command: &str,
        parameter: &str,
    ) -> Result<serde_json::Value, CgMinerError> {
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| CgMinerError::Timeout { addr: addr.to_string(), phase: "connect" })?
            .map_err(|err| {
                use std::io::ErrorKind;
                if err.kind() == ErrorKind::NotFound || err.kind() == ErrorKind::InvalidInput {
                    CgMinerError::Dns { addr: addr.to_string() }
                } else {
                    CgMinerError::Connection { addr: addr.to_string(), detail: err.to_string() }
                }
            })?;
        let mut stream = stream;

        let request = serde_json::json!({ "command": command, "parameter": parameter });
        let mut wire = serde_json::to_vec(&request).map_err(|err| CgMinerError::Parse {
            addr: addr.to_string(),
            detail: err.to_string(),
        })?;
        wire.push(0u8);

        tokio::time::timeout(self.config.send_timeout, stream.write_all(&wire))
            .await
            .map_err(|_| CgMinerError::Timeout { addr: addr.to_string(), phase: "send" })?
            .map_err(|err| CgMinerError::Connection {
                addr: addr.to_string(),
                detail: err.to_string(),
            })?;

        let raw = tokio::time::timeout(self.config.recv_timeout, read_response(&mut stream))
            .await
            .map_err(|_| CgMinerError::Timeout { addr: addr.to_string(), phase: "receive" })?
            .map_err(|err| match err {
                ReadError::TooLarge => CgMinerError::Parse {
                    addr: addr.to_string(),
                    detail: format!("response exceeded {MAX_RESPONSE_BYTES} bytes"),
                },
                ReadError::Io(io) => CgMinerError::Connection {
                    addr: addr.to_string(),
                    detail: io.to_string(),
                },
            })?;

        parse_response(addr, &raw)
    }
}

enum ReadError {
    TooLarge,
    Io(std::io::Error),
}

/// Read until NUL or EOF, bounded by [`MAX_RESPONSE_BYTES`].
async fn read_response(stream: &mut TcpStream) -> Result<Vec<u8>, ReadError> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.map_err(ReadError::Io)?;
        if n == 0 {
            return Ok(buf);
        }
        if let Some(nul) = chunk[..n].iter().position(|&b| b == 0) {
            buf.extend_from_slice(&chunk[..nul]);
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_RESPONSE_BYTES {
            return Err(ReadError::TooLarge);
        }
    }
}

fn parse_response(addr: &str, raw: &[u8]) -> Result<serde_json::Value, CgMinerError> {
    let text = std::str::from_utf8(raw).map_err(|_| CgMinerError::Parse {
        addr: addr.to_string(),
        detail: "response is not UTF-8".into(),
    })?;
    // Some firmwares leave trailing garbage after the JSON object.
    let trimmed = text.trim_matches(char::from(0)).trim();
    serde_json::from_str(trimmed).map_err(|err| CgMinerError::Parse {
        addr: addr.to_string(),
        detail: err.to_string(),
    })
}
