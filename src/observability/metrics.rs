use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Once;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Cycle metrics
    pub static ref CYCLES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("price_cycles_total", "Refresh cycles by trigger and outcome"),
        &["trigger", "outcome"]
    ).unwrap();

    pub static ref CYCLE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "price_cycle_duration_seconds",
            "Wall time of one refresh cycle"
        ).buckets(vec![0.1, 1.0, 5.0, 15.0, 60.0, 180.0, 600.0, 1800.0])
    ).unwrap();

    // Entity metrics
    pub static ref ENTITIES_REFRESHED_TOTAL: IntCounter = IntCounter::new(
        "price_entities_refreshed_total",
        "Entities whose snapshot was committed"
    ).unwrap();

    pub static ref ENTITIES_FAILED_TOTAL: IntCounter = IntCounter::new(
        "price_entities_failed_total",
        "Entities that failed within a cycle"
    ).unwrap();

    // Source metrics
    pub static ref SOURCE_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("price_source_requests_total", "HTTP requests to price sources by outcome"),
        &["source", "outcome"]
    ).unwrap();

    pub static ref RATE_LIMIT_WAIT_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "price_rate_limit_wait_seconds",
            "Time spent waiting for a rate limiter slot"
        ).buckets(vec![0.0, 0.1, 0.5, 1.0, 1.5, 3.0, 10.0, 30.0]),
        &["source"]
    ).unwrap();

    // Retention metrics
    pub static ref SNAPSHOTS_DELETED_TOTAL: IntCounter = IntCounter::new(
        "price_snapshots_deleted_total",
        "Snapshots removed by retention cleanup"
    ).unwrap();

    pub static ref SCHEDULER_RUNNING: IntGauge = IntGauge::new(
        "price_scheduler_running",
        "1 while the background scheduler loop is alive"
    ).unwrap();
}

static REGISTER: Once = Once::new();

pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(CYCLES_TOTAL.clone()),
            Box::new(CYCLE_DURATION_SECONDS.clone()),
            Box::new(ENTITIES_REFRESHED_TOTAL.clone()),
            Box::new(ENTITIES_FAILED_TOTAL.clone()),
            Box::new(SOURCE_REQUESTS_TOTAL.clone()),
            Box::new(RATE_LIMIT_WAIT_SECONDS.clone()),
            Box::new(SNAPSHOTS_DELETED_TOTAL.clone()),
            Box::new(SCHEDULER_RUNNING.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!("Failed to register metric: {}", e);
            }
        }
    });
}

/// Prometheus text exposition of every registered metric.
pub fn gather_metrics() -> String {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
