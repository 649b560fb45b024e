//! Metrics collection and exposition.
//!
//! # Metrics
//! - `reloadkit_events_total` (counter): change events by outcome
//!   (delivered, dropped, rejected, unsupported)
//! - `reloadkit_origin_read_failures_total` (counter): failed origin reads
//! - `reloadkit_component_actions_total` (counter): registry actions by kind
//! - `reloadkit_reload_failures_total` (counter): component build/reload failures
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are low-cardinality enums, never config values

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn record_event(outcome: &'static str) {
    metrics::counter!("reloadkit_events_total", "outcome" => outcome).increment(1);
}

pub fn record_origin_read_failure(origin: &'static str) {
    metrics::counter!("reloadkit_origin_read_failures_total", "origin" => origin).increment(1);
}

pub fn record_component_action(kind: &'static str, action: &'static str) {
    metrics::counter!("reloadkit_component_actions_total", "kind" => kind, "action" => action)
        .increment(1);
}

pub fn record_reload_failure(kind: &'static str) {
    metrics::counter!("reloadkit_reload_failures_total", "kind" => kind).increment(1);
}
