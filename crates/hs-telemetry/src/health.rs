//! # Health & SLO Report
//!
//! Assembles the `/health` body from probe inputs. Thresholds:
//!
//! | Probe | Warn | Critical |
//! |-------|------|----------|
//! | DB round-trip | ≥ 100 ms | ≥ 500 ms |
//! | Outbox backlog | >= 1000 rows or oldest >= 5 min | n/a |
//! | Consumer lag | ≥ 1k | ≥ 10k |
//! | Open DLQ entries | > 10 | n/a |
//! | Cache hit rate | < 80% | n/a |
//! | Write-to-visible p95 | >= 3 s | n/a |

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Per-component status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Warn,
    Critical,
}

impl HealthStatus {
    fn worst(self, other: Self) -> Self {
        use HealthStatus::*;
        match (self, other) {
            (Critical, _) | (_, Critical) => Critical,
            (Warn, _) | (_, Warn) => Warn,
            _ => Ok,
        }
    }
}

/// One named probe with its status and observed value.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub status: HealthStatus,
    pub value: serde_json::Value,
}

/// Raw probe inputs gathered by the runtime.
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub db_roundtrip: Option<Duration>,
    pub outbox_backlog: usize,
    pub outbox_oldest_age: Option<Duration>,
    pub consumer_lag: usize,
    pub dlq_open: usize,
    /// `(consumer, event_kind, count)` breakdown of open DLQ entries.
    pub dlq_breakdown: Vec<(String, String, usize)>,
    /// Hits / (hits + misses); `None` before the first lookup.
    pub cache_hit_rate: Option<f64>,
    /// Age of the newest derived-view row.
    pub derived_freshness_age: Option<Duration>,
    /// Sampled write-to-visible p95.
    pub write_to_visible_p95: Option<Duration>,
}

/// The assembled `/health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub dlq_breakdown: Vec<DlqBucket>,
}

/// One `(consumer, kind)` DLQ bucket.
#[derive(Debug, Clone, Serialize)]
pub struct DlqBucket {
    pub consumer: String,
    pub kind: String,
    pub count: usize,
}

impl HealthReport {
    /// Evaluate a snapshot against the SLO thresholds.
    #[must_use]
    pub fn evaluate(snap: &HealthSnapshot) -> Self {
        let mut components = Vec::new();

        let db_status = match snap.db_roundtrip {
            Some(rt) if rt >= Duration::from_millis(500) => HealthStatus::Critical,
            Some(rt) if rt >= Duration::from_millis(100) => HealthStatus::Warn,
            Some(_) => HealthStatus::Ok,
            None => HealthStatus::Critical,
        };
        components.push(ComponentHealth {
            name: "database",
            status: db_status,
            value: serde_json::json!({
                "roundtrip_ms": snap.db_roundtrip.map(|d| d.as_millis() as u64)
            }),
        });

        let backlog_old = snap
            .outbox_oldest_age
            .is_some_and(|age| age >= Duration::from_secs(300));
        let outbox_status = if snap.outbox_backlog >= 1000 || backlog_old {
            HealthStatus::Warn
        } else {
            HealthStatus::Ok
        };
        components.push(ComponentHealth {
            name: "outbox_backlog",
            status: outbox_status,
            value: serde_json::json!({
                "unpublished": snap.outbox_backlog,
                "oldest_age_secs": snap.outbox_oldest_age.map(|d| d.as_secs()),
            }),
        });

        let lag_status = if snap.consumer_lag >= 10_000 {
            HealthStatus::Critical
        } else if snap.consumer_lag >= 1000 {
            HealthStatus::Warn
        } else {
            HealthStatus::Ok
        };
        components.push(ComponentHealth {
            name: "consumer_lag",
            status: lag_status,
            value: serde_json::json!({ "messages": snap.consumer_lag }),
        });

        let dlq_status = if snap.dlq_open > 10 {
            HealthStatus::Warn
        } else {
            HealthStatus::Ok
        };
        components.push(ComponentHealth {
            name: "dlq",
            status: dlq_status,
            value: serde_json::json!({ "open": snap.dlq_open }),
        });

        let cache_status = match snap.cache_hit_rate {
            Some(rate) if rate < 0.80 => HealthStatus::Warn,
            _ => HealthStatus::Ok,
        };
        components.push(ComponentHealth {
            name: "cache_hit_rate",
            status: cache_status,
            value: serde_json::json!({ "rate": snap.cache_hit_rate }),
        });

        components.push(ComponentHealth {
            name: "derived_freshness",
            status: HealthStatus::Ok,
            value: serde_json::json!({
                "age_secs": snap.derived_freshness_age.map(|d| d.as_secs())
            }),
        });

        let wtv_status = match snap.write_to_visible_p95 {
            Some(p95) if p95 >= Duration::from_secs(3) => HealthStatus::Warn,
            _ => HealthStatus::Ok,
        };
        components.push(ComponentHealth {
            name: "write_to_visible_p95",
            status: wtv_status,
            value: serde_json::json!({
                "p95_ms": snap.write_to_visible_p95.map(|d| d.as_millis() as u64)
            }),
        });

        let status = components
            .iter()
            .fold(HealthStatus::Ok, |acc, c| acc.worst(c.status));

        Self {
            status,
            components,
            dlq_breakdown: snap
                .dlq_breakdown
                .iter()
                .map(|(consumer, kind, count)| DlqBucket {
                    consumer: consumer.clone(),
                    kind: kind.clone(),
                    count: *count,
                })
                .collect(),
        }
    }
}

/// Bounded window of latency samples with percentile lookup. Backs the
/// write-to-visible p95 probe.
pub struct LatencyTracker {
    samples: Mutex<VecDeque<Duration>>,
    capacity: usize,
}

impl LatencyTracker {
    /// Tracker keeping the most recent `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Record one sample.
    pub fn record(&self, sample: Duration) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Percentile over the current window (`p` in 0..=100).
    #[must_use]
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(sorted[rank.min(sorted.len() - 1)])
    }

    /// p95 convenience.
    #[must_use]
    pub fn p95(&self) -> Option<Duration> {
        self.percentile(95.0)
    }

    /// Samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// True when no samples were recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_ok() {
        let snap = HealthSnapshot {
            db_roundtrip: Some(Duration::from_millis(3)),
            cache_hit_rate: Some(0.99),
            ..HealthSnapshot::default()
        };
        let report = HealthReport::evaluate(&snap);
        assert_eq!(report.status, HealthStatus::Ok);
    }

    #[test]
    fn test_db_thresholds() {
        let mut snap = HealthSnapshot {
            db_roundtrip: Some(Duration::from_millis(150)),
            ..HealthSnapshot::default()
        };
        assert_eq!(HealthReport::evaluate(&snap).status, HealthStatus::Warn);

        snap.db_roundtrip = Some(Duration::from_millis(600));
        assert_eq!(HealthReport::evaluate(&snap).status, HealthStatus::Critical);
    }

    #[test]
    fn test_outbox_backlog_warns_on_age() {
        let snap = HealthSnapshot {
            db_roundtrip: Some(Duration::from_millis(1)),
            outbox_backlog: 3,
            outbox_oldest_age: Some(Duration::from_secs(600)),
            ..HealthSnapshot::default()
        };
        let report = HealthReport::evaluate(&snap);
        assert_eq!(report.status, HealthStatus::Warn);
    }

    #[test]
    fn test_lag_critical() {
        let snap = HealthSnapshot {
            db_roundtrip: Some(Duration::from_millis(1)),
            consumer_lag: 20_000,
            ..HealthSnapshot::default()
        };
        assert_eq!(HealthReport::evaluate(&snap).status, HealthStatus::Critical);
    }

    #[test]
    fn test_cache_hit_rate_warns() {
        let snap = HealthSnapshot {
            db_roundtrip: Some(Duration::from_millis(1)),
            cache_hit_rate: Some(0.5),
            ..HealthSnapshot::default()
        };
        assert_eq!(HealthReport::evaluate(&snap).status, HealthStatus::Warn);
    }

    #[test]
    fn test_latency_tracker_p95() {
        let tracker = LatencyTracker::new(100);
        for ms in 1..=100u64 {
            tracker.record(Duration::from_millis(ms));
        }
        let p95 = tracker.p95().unwrap();
        assert!(p95 >= Duration::from_millis(94) && p95 <= Duration::from_millis(96));
    }

    #[test]
    fn test_latency_tracker_bounded() {
        let tracker = LatencyTracker::new(4);
        for ms in 0..10u64 {
            tracker.record(Duration::from_millis(ms));
        }
        assert_eq!(tracker.len(), 4);
    }

    #[test]
    fn test_empty_tracker() {
        let tracker = LatencyTracker::default();
        assert!(tracker.is_empty());
        assert!(tracker.p95().is_none());
    }
}
