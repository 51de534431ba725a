//! Per-entity application locks.
//!
//! Short-lived exclusive locks keyed by partition key (`tenant:entity`),
//! preventing two handler instances from processing the same entity
//! concurrently across a rebalance. TTL-bounded so a dead worker cannot
//! wedge an entity forever; expired entries are reclaimed on contact and by
//! the periodic sweep.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// The lock table. Cheap to clone via `Arc`.
pub struct EntityLockMap {
    held: DashMap<String, Instant>,
    ttl: Duration,
}

impl EntityLockMap {
    /// Create a lock map with the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            held: DashMap::new(),
            ttl,
        }
    }

    /// Try to acquire the lock for `key`. Returns a guard on success; the
    /// guard releases on drop. An expired holder counts as free.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>, key: &str) -> Option<EntityLockGuard> {
        let now = Instant::now();
        let mut acquired = false;
        let expiry = now + self.ttl;

        self.held
            .entry(key.to_string())
            .and_modify(|held_until| {
                if *held_until <= now {
                    *held_until = expiry;
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                expiry
            });

        if acquired {
            Some(EntityLockGuard {
                map: Arc::clone(self),
                key: key.to_string(),
            })
        } else {
            None
        }
    }

    /// Drop every expired entry. Called opportunistically by the runtime.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.held.retain(|key, held_until| {
            let live = *held_until > now;
            if !live {
                debug!(key = %key, "Reclaimed expired entity lock");
            }
            live
        });
    }

    /// Currently tracked keys (held or expired-but-unswept).
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// True when no locks are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// RAII guard for one held entity lock.
pub struct EntityLockGuard {
    map: Arc<EntityLockMap>,
    key: String,
}

impl Drop for EntityLockGuard {
    fn drop(&mut self) {
        self.map.held.remove(&self.key);
    }
}
