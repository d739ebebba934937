//! RED metrics for function calls, registered with the default registry.

use std::sync::OnceLock;

use prometheus::{HistogramVec, IntCounterVec, TextEncoder};

struct Metrics {
    requests: IntCounterVec,
    responses: IntCounterVec,
    duration: HistogramVec,
}

fn metrics() -> &'static Metrics {
    static METRICS: OnceLock<Metrics> = OnceLock::new();
    METRICS.get_or_init(|| Metrics {
        requests: prometheus::register_int_counter_vec!(
            "composition_run_function_request_total",
            "Total RunFunction requests sent.",
            &["function"]
        )
        .expect("first registration cannot collide"),
        responses: prometheus::register_int_counter_vec!(
            "composition_run_function_response_total",
            "Total RunFunction responses, by gRPC code and most severe result.",
            &["function", "grpc_code", "result_severity"]
        )
        .expect("first registration cannot collide"),
        duration: prometheus::register_histogram_vec!(
            "composition_run_function_seconds",
            "Histogram of RunFunction call latency.",
            &["function"]
        )
        .expect("first registration cannot collide"),
    })
}

pub(crate) fn record_request(function: &str) {
    metrics().requests.with_label_values(&[function]).inc();
}

pub(crate) fn record_response(function: &str, grpc_code: &str, severity: &str, seconds: f64) {
    metrics()
        .responses
        .with_label_values(&[function, grpc_code, severity])
        .inc();
    metrics()
        .duration
        .with_label_values(&[function])
        .observe(seconds);
}

/// Render all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_encodes() {
        record_request("function-render");
        record_response("function-render", "Ok", "Normal", 0.02);
        let body = encode_metrics();
        assert!(body.contains("composition_run_function_request_total"));
        assert!(body.contains("composition_run_function_seconds"));
    }
}
