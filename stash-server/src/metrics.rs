//! Prometheus metrics for the HTTP surface: request counts and latency,
//! exported at `/metrics`. This is ambient server observability, not a
//! user-facing metrics feature (no per-key usage stats or dashboards).

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramVec, IntCounterVec, TextEncoder, register_histogram_vec, register_int_counter_vec};

lazy_static! {
    static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "stash_http_requests_total",
        "Total HTTP requests handled, by route and status code",
        &["route", "method", "status"]
    )
    .expect("metric registration");
    static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "stash_http_request_duration_seconds",
        "HTTP request latency in seconds, by route",
        &["route", "method"]
    )
    .expect("metric registration");
}

/// Force the lazily-registered collectors into existence. Idempotent;
/// harmless to call more than once (e.g. from tests).
pub fn register_metrics() {
    lazy_static::initialize(&HTTP_REQUESTS_TOTAL);
    lazy_static::initialize(&HTTP_REQUEST_DURATION_SECONDS);
}

/// Record one completed request.
pub fn observe_request(route: &str, method: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[route, method, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[route, method])
        .observe(duration_secs);
}

/// Render the current metric set in Prometheus text exposition format.
pub fn encode_metrics() -> Result<Vec<u8>, prometheus::Error> {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_metrics_includes_recorded_observations() {
        register_metrics();
        observe_request("/kv/:key", "GET", 200, 0.01);
        let output = String::from_utf8(encode_metrics().unwrap()).unwrap();
        assert!(output.contains("stash_http_requests_total"));
    }
}
