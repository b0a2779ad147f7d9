//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_http_requests_total` (counter): by method, route, status
//! - `gateway_http_request_duration_seconds` (histogram): by method, route
//! - `gateway_proxy_calls_total` (counter): passthrough calls by method, gRPC code
//! - `gateway_proxy_call_duration_seconds` (histogram): by method
//! - `gateway_pool_connections` (gauge): by endpoint, state (active/idle)
//! - `gateway_registered_services` (gauge)

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::pool::PoolStats;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_http_request(method: &str, route: &str, status: u16, elapsed: Duration) {
    counter!(
        "gateway_http_requests_total",
        "method" => method.to_owned(),
        "route" => route.to_owned(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "gateway_http_request_duration_seconds",
        "method" => method.to_owned(),
        "route" => route.to_owned()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_proxy_call(method: &str, code: tonic::Code, elapsed: Duration) {
    counter!(
        "gateway_proxy_calls_total",
        "method" => method.to_owned(),
        "code" => format!("{code:?}")
    )
    .increment(1);
    histogram!("gateway_proxy_call_duration_seconds", "method" => method.to_owned())
        .record(elapsed.as_secs_f64());
}

pub fn record_pool(endpoint: &str, stats: PoolStats) {
    gauge!("gateway_pool_connections", "endpoint" => endpoint.to_owned(), "state" => "active")
        .set(stats.active as f64);
    gauge!("gateway_pool_connections", "endpoint" => endpoint.to_owned(), "state" => "idle")
        .set(stats.idle as f64);
}

pub fn set_registered_services(count: usize) {
    gauge!("gateway_registered_services").set(count as f64);
}
