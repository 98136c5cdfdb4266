//! Prometheus-compatible metrics endpoint.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::state::AppState;

/// Metrics collector.
#[derive(Debug)]
pub struct Metrics {
    start_time: Instant,
    request_count: RwLock<u64>,
    requests_by_endpoint: RwLock<std::collections::HashMap<String, u64>>,
    bytes_served: RwLock<u64>,
    packets_ingested: RwLock<u64>,
    hook_deliveries: RwLock<u64>,
    errors_by_type: RwLock<std::collections::HashMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            request_count: RwLock::new(0),
            requests_by_endpoint: RwLock::new(std::collections::HashMap::new()),
            bytes_served: RwLock::new(0),
            packets_ingested: RwLock::new(0),
            hook_deliveries: RwLock::new(0),
            errors_by_type: RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn record_request(&self, endpoint: &str) {
        *self.request_count.write() += 1;
        *self.requests_by_endpoint.write().entry(endpoint.to_string()).or_insert(0) += 1;
    }

    pub fn record_bytes(&self, bytes: u64) {
        *self.bytes_served.write() += bytes;
    }

    pub fn record_packet(&self) {
        *self.packets_ingested.write() += 1;
    }

    pub fn record_hook_delivery(&self) {
        *self.hook_deliveries.write() += 1;
    }

    pub fn record_error(&self, error_type: &str) {
        *self.errors_by_type.write().entry(error_type.to_string()).or_insert(0) += 1;
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn hook_deliveries(&self) -> u64 {
        *self.hook_deliveries.read()
    }

    pub fn export_prometheus(&self, active_streams: u64) -> String {
        let mut output = String::new();

        output.push_str("# HELP media_server_uptime_seconds Server uptime in seconds\n");
        output.push_str("# TYPE media_server_uptime_seconds counter\n");
        output.push_str(&format!("media_server_uptime_seconds {}\n", self.uptime_secs()));

        output.push_str("\n# HELP media_server_start_time_seconds Server start time as Unix timestamp\n");
        output.push_str("# TYPE media_server_start_time_seconds gauge\n");
        output.push_str(&format!(
            "media_server_start_time_seconds {}\n",
            std::time::SystemTime::UNIX_EPOCH.elapsed().unwrap_or(Duration::ZERO).as_secs() - self.uptime_secs()
        ));

        output.push_str("\n# HELP media_requests_total Total number of HTTP requests\n");
        output.push_str("# TYPE media_requests_total counter\n");
        output.push_str(&format!("media_requests_total {}\n", *self.request_count.read()));

        output.push_str("\n# HELP media_requests_by_endpoint Requests by endpoint\n");
        output.push_str("# TYPE media_requests_by_endpoint counter\n");
        for (endpoint, count) in self.requests_by_endpoint.read().iter() {
            output.push_str(&format!("media_requests_by_endpoint{{endpoint=\"{}\"}} {}\n", endpoint, count));
        }

        output.push_str("\n# HELP media_bytes_served_total Total bytes served\n");
        output.push_str("# TYPE media_bytes_served_total counter\n");
        output.push_str(&format!("media_bytes_served_total {}\n", *self.bytes_served.read()));

        output.push_str("\n# HELP media_packets_ingested_total Total media packets ingested across all streams\n");
        output.push_str("# TYPE media_packets_ingested_total counter\n");
        output.push_str(&format!("media_packets_ingested_total {}\n", *self.packets_ingested.read()));

        output.push_str("\n# HELP media_hook_deliveries_total Total hook callbacks dispatched\n");
        output.push_str("# TYPE media_hook_deliveries_total counter\n");
        output.push_str(&format!("media_hook_deliveries_total {}\n", *self.hook_deliveries.read()));

        output.push_str("\n# HELP media_active_streams Number of currently registered streams\n");
        output.push_str("# TYPE media_active_streams gauge\n");
        output.push_str(&format!("media_active_streams {}\n", active_streams));

        output.push_str("\n# HELP media_errors_total Total errors by type\n");
        output.push_str("# TYPE media_errors_total counter\n");
        for (error_type, count) in self.errors_by_type.read().iter() {
            output.push_str(&format!("media_errors_total{{type=\"{}\"}} {}\n", error_type, count));
        }

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let output = state.metrics.export_prometheus(state.sources.len() as u64);
    (StatusCode::OK, [("Content-Type", "text/plain; version=0.0.4")], output).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert!(metrics.uptime_secs() < 2);
    }

    #[test]
    fn test_record_request() {
        let metrics = Metrics::new();
        metrics.record_request("/test");
        metrics.record_request("/test");
        assert_eq!(*metrics.request_count.read(), 2);
        assert_eq!(metrics.requests_by_endpoint.read().get("/test"), Some(&2));
    }

    #[test]
    fn test_export_prometheus() {
        let metrics = Metrics::new();
        metrics.record_request("/test");
        metrics.record_packet();
        let output = metrics.export_prometheus(3);
        assert!(output.contains("media_requests_total"));
        assert!(output.contains("media_active_streams 3"));
    }

    #[test]
    fn test_error_recording() {
        let metrics = Metrics::new();
        metrics.record_error("recovery_exhausted");
        metrics.record_error("recovery_exhausted");
        let errors = metrics.errors_by_type.read();
        assert_eq!(errors.get("recovery_exhausted"), Some(&2));
    }
}
