//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the HTTP surface and for every
//! external call made by the refinement loop.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all MedSearch metrics
pub const METRICS_PREFIX: &str = "medsearch";

/// Histogram buckets for request latency (in seconds)
/// A refinement request makes several sequential remote calls, so
/// buckets reach into minutes.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 1m
    120.0,  // 2m
];

/// Buckets for a single oracle or literature call
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Refinement metrics
    describe_counter!(
        format!("{}_refinement_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Refinement runs by outcome"
    );

    describe_histogram!(
        format!("{}_refinement_iterations", METRICS_PREFIX),
        Unit::Count,
        "Search iterations executed per refinement run"
    );

    // Literature source metrics
    describe_counter!(
        format!("{}_literature_searches_total", METRICS_PREFIX),
        Unit::Count,
        "Literature source searches by status"
    );

    describe_histogram!(
        format!("{}_literature_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Literature source round-trip latency in seconds"
    );

    // Oracle metrics
    describe_counter!(
        format!("{}_oracle_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Oracle completions by call site and status"
    );

    describe_histogram!(
        format!("{}_oracle_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Oracle completion latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record the end of a refinement run
pub fn record_refinement(outcome: &str, iterations: u32) {
    counter!(
        format!("{}_refinement_runs_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_refinement_iterations", METRICS_PREFIX)).record(iterations as f64);
}

/// Helper to record a literature source call
pub fn record_literature_search(duration_secs: f64, source: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_literature_searches_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_literature_search_duration_seconds", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .record(duration_secs);
}

/// Helper to record an oracle call
pub fn record_oracle(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_oracle_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_oracle_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}
