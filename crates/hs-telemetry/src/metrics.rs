//! Prometheus metrics for the HashSentry core.
//!
//! Naming convention: `hs_<component>_<metric>_<unit>`.

use crate::TelemetryError;
use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    /// Global metrics registry.
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // CDC PUBLISHER (C3)
    // =========================================================================

    /// Outbox rows published to the bus.
    pub static ref EVENTS_PUBLISHED: Counter = Counter::new(
        "hs_publisher_events_published_total",
        "Outbox rows acknowledged by the transport"
    ).expect("metric creation failed");

    /// Current unpublished outbox backlog.
    pub static ref OUTBOX_BACKLOG: Gauge = Gauge::new(
        "hs_publisher_outbox_backlog",
        "Unpublished outbox rows"
    ).expect("metric creation failed");

    // =========================================================================
    // CONSUMER RUNTIME (C5)
    // =========================================================================

    /// Consumed events by consumer and outcome
    /// (ok / duplicate / retried / dlq / lock_busy).
    pub static ref EVENTS_CONSUMED: CounterVec = CounterVec::new(
        Opts::new("hs_consumer_events_total", "Events processed by outcome"),
        &["consumer", "outcome"]
    ).expect("metric creation failed");

    /// Handler execution time.
    pub static ref HANDLER_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "hs_consumer_handler_duration_seconds",
            "Time spent inside event handlers"
        ).buckets(exponential_buckets(0.001, 2.0, 12).expect("buckets")),
        &["consumer"]
    ).expect("metric creation failed");

    /// Write-to-visible latency: outbox `created_at` to derived-view update.
    pub static ref WRITE_TO_VISIBLE: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "hs_pipeline_write_to_visible_seconds",
            "Business commit to derived view visibility"
        ).buckets(exponential_buckets(0.01, 2.0, 12).expect("buckets"))
    ).expect("metric creation failed");

    /// Current consumer lag summed across groups.
    pub static ref CONSUMER_LAG: Gauge = Gauge::new(
        "hs_consumer_lag",
        "Undelivered bus messages summed across groups"
    ).expect("metric creation failed");

    /// Open (unreplayed) DLQ entries.
    pub static ref DLQ_OPEN: Gauge = Gauge::new(
        "hs_dlq_open_entries",
        "Dead-lettered events awaiting operator action"
    ).expect("metric creation failed");

    // =========================================================================
    // COLLECTOR INGEST (C7)
    // =========================================================================

    /// Upload requests by outcome (accepted / rejected) and reason.
    pub static ref UPLOADS: CounterVec = CounterVec::new(
        Opts::new("hs_ingest_uploads_total", "Collector uploads by outcome"),
        &["outcome", "reason"]
    ).expect("metric creation failed");

    /// Telemetry records accepted.
    pub static ref RECORDS_ACCEPTED: Counter = Counter::new(
        "hs_ingest_records_total",
        "Telemetry records written to live+history"
    ).expect("metric creation failed");

    /// Upload processing time.
    pub static ref UPLOAD_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "hs_ingest_upload_duration_seconds",
            "Time from request receipt to response"
        ).buckets(exponential_buckets(0.005, 2.0, 10).expect("buckets"))
    ).expect("metric creation failed");

    /// Collector key cache lookups by result (hit / miss / stale_hit).
    pub static ref KEY_CACHE: CounterVec = CounterVec::new(
        Opts::new("hs_ingest_key_cache_total", "Collector key cache lookups"),
        &["result"]
    ).expect("metric creation failed");

    // =========================================================================
    // COMMAND QUEUE (C8)
    // =========================================================================

    /// Command state transitions.
    pub static ref COMMAND_TRANSITIONS: CounterVec = CounterVec::new(
        Opts::new("hs_commands_transitions_total", "Command status transitions"),
        &["to"]
    ).expect("metric creation failed");
}

/// Handle proving metrics were registered. Keep it alive for the process
/// lifetime.
pub struct MetricsHandle {
    _private: (),
}

/// Register every metric with the global registry. Idempotent: re-running
/// returns a handle even when the collectors are already registered.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(OUTBOX_BACKLOG.clone()),
        Box::new(EVENTS_CONSUMED.clone()),
        Box::new(HANDLER_DURATION.clone()),
        Box::new(WRITE_TO_VISIBLE.clone()),
        Box::new(CONSUMER_LAG.clone()),
        Box::new(DLQ_OPEN.clone()),
        Box::new(UPLOADS.clone()),
        Box::new(RECORDS_ACCEPTED.clone()),
        Box::new(UPLOAD_DURATION.clone()),
        Box::new(KEY_CACHE.clone()),
        Box::new(COMMAND_TRANSITIONS.clone()),
    ];

    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) => {}
            Err(prometheus::Error::AlreadyReg) => {}
            Err(err) => return Err(TelemetryError::MetricsInit(err.to_string())),
        }
    }
    Ok(MetricsHandle { _private: () })
}

/// Render the registry in the Prometheus text exposition format.
#[must_use]
pub fn gather_text() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&REGISTRY.gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
