use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Histogram, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

// Metrics registry
static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "status"],
        vec![0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 5.0]
    )
    .expect("http_request_duration_seconds registers once")
});

static RATE_LIMIT_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_decisions_total",
        "Admission decisions by outcome",
        &["algorithm", "outcome"]
    )
    .expect("rate_limit_decisions_total registers once")
});

static RATE_LIMIT_CHECK_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "rate_limit_check_duration_seconds",
        "Latency of one admission check including store round trips",
        vec![0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]
    )
    .expect("rate_limit_check_duration_seconds registers once")
});

static STORE_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_store_errors_total",
        "Failed or timed out shared store calls",
        &["operation"]
    )
    .expect("rate_limit_store_errors_total registers once")
});

static BLOCKS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "rate_limit_blocks_total",
        "Identifiers moved to the blocked state"
    )
    .expect("rate_limit_blocks_total registers once")
});

pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn record_http_duration(method: &str, status: u16, duration: f64) {
        HTTP_REQUEST_DURATION
            .with_label_values(&[method, &status.to_string()])
            .observe(duration);
    }

    /// `outcome` is one of allowed, denied, blocked, fail_open, fail_closed
    pub fn record_decision(algorithm: &str, outcome: &str) {
        RATE_LIMIT_DECISIONS_TOTAL
            .with_label_values(&[algorithm, outcome])
            .inc();
    }

    pub fn record_check_duration(duration: f64) {
        RATE_LIMIT_CHECK_DURATION.observe(duration);
    }

    pub fn record_store_error(operation: &str) {
        STORE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
    }

    pub fn record_block() {
        BLOCKS_TOTAL.inc();
    }

    /// Export all metrics in Prometheus format
    pub fn export() -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        encoder.encode_to_string(&metric_families)
    }
}
