//! # Collector Key Cache
//!
//! Stale-while-revalidate cache in front of the `collector_keys` table.
//! Fresh entries are served directly; stale-but-recent entries are served
//! immediately while a background task refreshes them; anything older is
//! looked up synchronously. Hit/miss counters feed the cache-hit-rate
//! health probe.
//!
//! Revocation therefore propagates within the stale window, which is the
//! accepted trade for keeping the hot path off the store lock.

use dashmap::DashMap;
use hs_telemetry::metrics::KEY_CACHE;
use shared_store::Store;
use shared_types::{KeyId, SiteId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A cached lookup result. `None` caches a miss (unknown hash).
#[derive(Debug, Clone)]
pub struct CachedKey {
    pub key_id: KeyId,
    pub site_id: SiteId,
    pub active: bool,
}

struct Entry {
    value: Option<CachedKey>,
    fetched_at: Instant,
}

/// The cache itself.
pub struct KeyCache {
    store: Store,
    entries: DashMap<String, Entry>,
    fresh_for: Duration,
    stale_for: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl KeyCache {
    /// Default freshness window.
    pub const DEFAULT_FRESH: Duration = Duration::from_secs(5);
    /// Default stale-while-revalidate window (beyond freshness).
    pub const DEFAULT_STALE: Duration = Duration::from_secs(60);

    /// Build a cache over the store with default windows.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self::with_windows(store, Self::DEFAULT_FRESH, Self::DEFAULT_STALE)
    }

    /// Build a cache with explicit windows.
    #[must_use]
    pub fn with_windows(store: Store, fresh_for: Duration, stale_for: Duration) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            fresh_for,
            stale_for,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a key hash.
    pub fn lookup(self: &Arc<Self>, key_hash: &str) -> Option<CachedKey> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key_hash) {
            let age = now.duration_since(entry.fetched_at);
            if age <= self.fresh_for {
                self.hits.fetch_add(1, Ordering::Relaxed);
                KEY_CACHE.with_label_values(&["hit"]).inc();
                return entry.value.clone();
            }
            if age <= self.fresh_for + self.stale_for {
                // Serve stale, refresh in the background.
                self.hits.fetch_add(1, Ordering::Relaxed);
                KEY_CACHE.with_label_values(&["stale_hit"]).inc();
                let value = entry.value.clone();
                drop(entry);
                let cache = Arc::clone(self);
                let hash = key_hash.to_string();
                tokio::spawn(async move {
                    cache.refresh(&hash);
                });
                return value;
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        KEY_CACHE.with_label_values(&["miss"]).inc();
        self.refresh(key_hash)
    }

    /// Drop a cached hash (tests and key-revocation paths).
    pub fn invalidate(&self, key_hash: &str) {
        self.entries.remove(key_hash);
    }

    /// Hits / (hits + misses). `None` before the first lookup.
    #[must_use]
    pub fn hit_rate(&self) -> Option<f64> {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            None
        } else {
            Some(hits as f64 / total as f64)
        }
    }

    fn refresh(&self, key_hash: &str) -> Option<CachedKey> {
        let value = self.store.read(|t| {
            t.collector_key_by_hash(key_hash).map(|row| CachedKey {
                key_id: row.id,
                site_id: row.site_id.clone(),
                active: row.is_active(),
            })
        });
        debug!(found = value.is_some(), "Collector key cache refresh");
        self.entries.insert(
            key_hash.to_string(),
            Entry { value: value.clone(), fetched_at: Instant::now() },
        );
        value
    }
}
