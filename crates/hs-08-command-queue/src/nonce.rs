//! # Terminal Nonce Cache
//!
//! Fast-path replay rejection for result reports. When a command reaches a
//! terminal state its dispatch nonce is recorded here; a report echoing a
//! cached nonce is a replay and rejected without touching the command row.
//!
//! The cache is time-bounded: entries are garbage-collected once they are
//! older than the retention window. That bounds memory; the command row's
//! own terminal status remains the authoritative (and unbounded) check
//! behind this cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Time-bounded set of terminal dispatch nonces.
pub struct TerminalNonceCache {
    seen: HashMap<Uuid, Instant>,
    retention: Duration,
    gc_interval: Duration,
    last_gc: Instant,
}

impl TerminalNonceCache {
    /// Default retention: twice the default command TTL.
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(2 * 30 * 60);

    /// Garbage collection cadence.
    pub const GC_INTERVAL: Duration = Duration::from_secs(60);

    /// Create a cache with the default retention.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(Self::DEFAULT_RETENTION)
    }

    /// Create a cache with an explicit retention window.
    #[must_use]
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            retention,
            gc_interval: Self::GC_INTERVAL,
            last_gc: Instant::now(),
        }
    }

    /// Record a nonce as terminal.
    pub fn insert(&mut self, nonce: Uuid) {
        let now = Instant::now();
        if now.duration_since(self.last_gc) > self.gc_interval {
            self.garbage_collect(now);
            self.last_gc = now;
        }
        self.seen.insert(nonce, now);
    }

    /// Whether a nonce is known terminal.
    #[must_use]
    pub fn contains(&self, nonce: &Uuid) -> bool {
        self.seen.contains_key(nonce)
    }

    /// Cached nonce count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn garbage_collect(&mut self, now: Instant) {
        let retention = self.retention;
        self.seen
            .retain(|_, inserted| now.duration_since(*inserted) <= retention);
    }
}

impl Default for TerminalNonceCache {
    fn default() -> Self {
        Self::new()
    }
}
