//! Process-level self-observability
//!
//! These metrics live in the prometheus default registry and are served on
//! `/metrics`. They describe the exporter itself, never the scraped nodes,
//! so no label carries a node name.

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    Histogram, HistogramVec, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;

/// Histogram buckets for request and node scrape latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ExporterMetricsInner> = OnceLock::new();

struct ExporterMetricsInner {
    http_requests: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    node_scrape_duration_seconds: Histogram,
    node_scrape_errors: IntCounterVec,
    last_fanout_nodes: IntGaugeVec,
}

impl ExporterMetricsInner {
    fn new() -> Self {
        Self {
            http_requests: register_int_counter_vec!(
                "kube_summary_exporter_http_requests_total",
                "HTTP requests served, by handler and status code",
                &["handler", "code"]
            )
            .expect("Failed to register http_requests_total"),

            http_request_duration_seconds: register_histogram_vec!(
                "kube_summary_exporter_http_request_duration_seconds",
                "Time spent serving HTTP requests",
                &["handler"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register http_request_duration_seconds"),

            node_scrape_duration_seconds: register_histogram!(
                "kube_summary_exporter_node_scrape_duration_seconds",
                "Time spent fetching one node's /stats/summary",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register node_scrape_duration_seconds"),

            node_scrape_errors: register_int_counter_vec!(
                "kube_summary_exporter_node_scrape_errors_total",
                "Failed node scrapes, by failure kind",
                &["kind"]
            )
            .expect("Failed to register node_scrape_errors_total"),

            last_fanout_nodes: register_int_gauge_vec!(
                "kube_summary_exporter_last_fanout_nodes",
                "Nodes scraped by the most recent /nodes request, by outcome",
                &["outcome"]
            )
            .expect("Failed to register last_fanout_nodes"),
        }
    }
}

/// Handle to the exporter's own metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    _private: (),
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ExporterMetricsInner {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new)
    }

    /// Record one served HTTP request
    pub fn observe_request(&self, handler: &str, code: u16, duration_secs: f64) {
        self.inner()
            .http_requests
            .with_label_values(&[handler, &code.to_string()])
            .inc();
        self.inner()
            .http_request_duration_seconds
            .with_label_values(&[handler])
            .observe(duration_secs);
    }

    /// Record the latency of one node fetch, successful or not
    pub fn observe_node_scrape(&self, duration_secs: f64) {
        self.inner().node_scrape_duration_seconds.observe(duration_secs);
    }

    pub fn inc_node_scrape_errors(&self, kind: &str) {
        self.inner()
            .node_scrape_errors
            .with_label_values(&[kind])
            .inc();
    }

    /// Publish the outcome of the latest fan-out
    pub fn set_last_fanout(&self, succeeded: usize, failed: usize) {
        let gauge = &self.inner().last_fanout_nodes;
        gauge.with_label_values(&["succeeded"]).set(succeeded as i64);
        gauge.with_label_values(&["failed"]).set(failed as i64);
    }
}

/// Render the default registry, i.e. the exporter's own metrics
pub fn render_process_metrics() -> prometheus::Result<Vec<u8>> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}
