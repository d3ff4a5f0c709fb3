// Prometheus metrics for Solr Shield
//
// - Admitted / denied / hard-stopped requests (counters)
// - Request cost distribution (histogram)
// - Tracked user accounts (gauge)
// - Reclaimed user accounts (counter)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Admission metrics
    pub static ref REQUESTS_ADMITTED_TOTAL: IntCounter = IntCounter::new(
        "shield_requests_admitted_total",
        "Total number of requests admitted and charged"
    ).expect("Failed to create admitted requests metric");

    pub static ref REQUESTS_DENIED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("shield_requests_denied_total", "Total number of requests denied by a quota"),
        &["reason"]
    ).expect("Failed to create denied requests metric");

    pub static ref HARD_STOPS_TOTAL: IntCounter = IntCounter::new(
        "shield_hard_stops_total",
        "Total number of requests stopped by pricing rules"
    ).expect("Failed to create hard stops metric");

    pub static ref REQUEST_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("shield_request_errors_total", "Total number of rejected calls by error kind"),
        &["kind"]
    ).expect("Failed to create request errors metric");

    pub static ref REQUEST_COST: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("shield_request_cost", "Cost of admitted requests")
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
    ).expect("Failed to create request cost metric");

    // Registry metrics
    pub static ref TRACKED_USERS: IntGauge = IntGauge::new(
        "shield_tracked_users",
        "Number of user accounts currently held in memory"
    ).expect("Failed to create tracked users metric");

    pub static ref USERS_RECLAIMED_TOTAL: IntCounter = IntCounter::new(
        "shield_users_reclaimed_total",
        "Total number of idle user accounts reclaimed"
    ).expect("Failed to create reclaimed users metric");
}

/// Initialize metrics registry - must be called once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(REQUESTS_ADMITTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUESTS_DENIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HARD_STOPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEST_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEST_COST.clone()))?;
    REGISTRY.register(Box::new(TRACKED_USERS.clone()))?;
    REGISTRY.register(Box::new(USERS_RECLAIMED_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
