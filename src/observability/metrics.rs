//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edgeway_gateway_requests_total` (counter): gateway requests by outcome
//! - `edgeway_gateway_request_duration_seconds` (histogram): time to response headers
//! - `edgeway_rate_limited_total` (counter): requests rejected by the token bucket
//! - `edgeway_cache_lookups_total` (counter): cache lookups by result (hit, miss)
//! - `edgeway_stream_connections` (gauge): open stream connections
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op
//! - Labels are static strings to keep cardinality bounded

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::StartupError;

/// Install the Prometheus exporter on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), StartupError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| StartupError::Metrics(err.to_string()))?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Gateway request outcome, as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Forwarded,
    Static,
    CacheHit,
    RateLimited,
    Shed,
    Unauthorized,
    BackendError,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Forwarded => "forwarded",
            Outcome::Static => "static",
            Outcome::CacheHit => "cache_hit",
            Outcome::RateLimited => "rate_limited",
            Outcome::Shed => "shed",
            Outcome::Unauthorized => "unauthorized",
            Outcome::BackendError => "backend_error",
        }
    }
}

pub fn record_gateway_request(outcome: Outcome, started: Instant) {
    counter!("edgeway_gateway_requests_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("edgeway_gateway_request_duration_seconds", "outcome" => outcome.as_str())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    counter!("edgeway_rate_limited_total").increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("edgeway_cache_lookups_total", "result" => result).increment(1);
}

pub fn set_stream_connections(count: usize) {
    gauge!("edgeway_stream_connections").set(count as f64);
}
