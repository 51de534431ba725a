//! # Sliding-Window Rate Limiter
//!
//! Per-collector-key upload throttling: at most `limit` accepted requests
//! within any trailing `window`. Each key keeps the timestamps of its
//! accepted requests; a request is admitted when, after evicting entries
//! older than the window, fewer than `limit` remain.
//!
//! Stale per-key windows are dropped by [`SlidingWindowLimiter::cleanup`],
//! which the owning process runs periodically so the map stays bounded by
//! the set of recently active keys.

use dashmap::DashMap;
use shared_types::KeyId;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Outcome of a rate-limit check, carrying the response header values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    /// Seconds until the window frees a slot.
    pub reset_secs: u64,
    /// Advisory Retry-After for rejected requests.
    pub retry_after_secs: u64,
}

/// The limiter state shared across requests.
pub struct SlidingWindowLimiter {
    windows: DashMap<KeyId, VecDeque<Instant>>,
    limit: u32,
    window: Duration,
}

impl SlidingWindowLimiter {
    /// Build a limiter admitting `limit` requests per `window` per key.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit: limit.max(1),
            window,
        }
    }

    /// Check (and on success, consume) one slot for `key`.
    pub fn check(&self, key: KeyId) -> RateDecision {
        let now = Instant::now();
        let mut entry = self.windows.entry(key).or_default();

        // Evict timestamps that slid out of the window.
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        let used = entry.len() as u32;
        let oldest_expiry = |entry: &VecDeque<Instant>| {
            entry
                .front()
                .map(|front| {
                    self.window
                        .saturating_sub(now.duration_since(*front))
                        .as_secs()
                        .max(1)
                })
                .unwrap_or(0)
        };

        if used >= self.limit {
            let retry = oldest_expiry(&entry);
            debug!(limit = self.limit, "Upload rate limit exceeded");
            return RateDecision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_secs: retry,
                retry_after_secs: retry,
            };
        }

        entry.push_back(now);
        RateDecision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit - used - 1,
            reset_secs: oldest_expiry(&entry),
            retry_after_secs: 0,
        }
    }

    /// Drop keys whose whole window has expired.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = self.window;
        self.windows.retain(|_, timestamps| {
            timestamps
                .back()
                .is_some_and(|last| now.duration_since(*last) < window)
        });
    }

    /// Keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

/// Background task sweeping stale windows.
pub async fn cleanup_task(limiter: std::sync::Arc<SlidingWindowLimiter>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        limiter.cleanup();
    }
}
