//! Controller metrics
//!
//! Global-rule sync counters, histograms and gauges, rendered by the status
//! server's `/metrics` endpoint.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROLLER_METRICS_REGISTRY: Registry = Registry::new();

    /// Global rule reconciliation duration
    static ref GLOBAL_RULE_RECONCILIATION_DURATION: HistogramVec = {
        let opts = HistogramOpts::new(
            "global_rule_reconciliation_duration_seconds",
            "Global rule reconciliation duration in seconds",
        );
        let histogram = HistogramVec::new(opts, &["operation"])
            .expect("Failed to create histogram");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };

    /// Global rule reconciliations total
    static ref GLOBAL_RULE_RECONCILIATIONS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "global_rule_reconciliations_total",
            "Total number of global rule reconciliations",
        );
        let counter = IntCounterVec::new(opts, &["operation", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Rejected resources
    static ref TRANSLATION_FAILURES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "global_rule_translation_failures_total",
            "Total number of resources rejected by translation",
        );
        let counter = IntCounterVec::new(opts, &["kind"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Stale tasks dropped by the scheduler
    static ref CONSISTENCY_VIOLATIONS_TOTAL: IntCounter = {
        let counter = IntCounter::new(
            "global_rule_consistency_violations_total",
            "Total number of tasks dropped for carrying a stale generation",
        )
        .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Admin API requests
    static ref ADMIN_REQUESTS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "gateway_admin_requests_total",
            "Total number of gateway admin API requests",
        );
        let counter = IntCounterVec::new(opts, &["method", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Ids with a queued or in-flight task
    static ref PENDING_TASKS: IntGauge = {
        let gauge = IntGauge::new(
            "global_rule_pending_tasks",
            "Number of global rule ids with a queued or in-flight task",
        )
        .expect("Failed to create gauge");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(gauge.clone()))
            .expect("Failed to register gauge");
        gauge
    };
}

/// Record one reconcile attempt
///
/// `operation` is upsert / delete / noop, `result` is success / transient /
/// permanent.
pub fn record_reconciliation(operation: &str, duration_secs: f64, result: &str) {
    GLOBAL_RULE_RECONCILIATION_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);

    GLOBAL_RULE_RECONCILIATIONS_TOTAL
        .with_label_values(&[operation, result])
        .inc();
}

/// Record a translation rejection
pub fn record_translation_failure(kind: &str) {
    TRANSLATION_FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_consistency_violation() {
    CONSISTENCY_VIOLATIONS_TOTAL.inc();
}

/// Record an admin API request
pub fn record_admin_request(method: &str, result: &str) {
    ADMIN_REQUESTS_TOTAL
        .with_label_values(&[method, result])
        .inc();
}

pub fn set_pending_tasks(pending: usize) {
    PENDING_TASKS.set(pending as i64);
}

/// Gather controller metrics
pub fn gather_controller_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROLLER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}
