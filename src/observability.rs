//! Prometheus metrics for the query pipeline
//!
//! Two series cover the whole request lifecycle: a per-stage latency histogram
//! and an outcome counter. Both live in the default registry and are exposed
//! on GET /metrics.

use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramVec, IntCounterVec, TextEncoder};
use std::time::Instant;

pub static REQUEST_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    prometheus::register_histogram_vec!(
        "isaqe_request_latency_seconds",
        "Latency for user queries",
        &["stage"]
    )
    .expect("register isaqe_request_latency_seconds")
});

pub static REQUEST_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!(
        "isaqe_requests_total",
        "Total processed queries",
        &["status"]
    )
    .expect("register isaqe_requests_total")
});

/// Counts a finished request under `success`, `failed`, `rate_limited` or
/// `rejected`.
pub fn record_request(status: &str) {
    REQUEST_COUNTER.with_label_values(&[status]).inc();
}

/// Observes elapsed time for one pipeline stage on drop; errored stages are
/// recorded too.
pub struct StageTimer {
    stage: &'static str,
    start: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self { stage, start: Instant::now() }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        REQUEST_LATENCY
            .with_label_values(&[self.stage])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_timer_records_on_drop() {
        let before = REQUEST_LATENCY.with_label_values(&["test_stage"]).get_sample_count();
        {
            let _timer = StageTimer::start("test_stage");
        }
        let after = REQUEST_LATENCY.with_label_values(&["test_stage"]).get_sample_count();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn request_counter_accepts_all_statuses() {
        for status in ["success", "failed", "rate_limited", "rejected"] {
            record_request(status);
        }
        assert!(REQUEST_COUNTER.with_label_values(&["success"]).get() >= 1);
    }
}
