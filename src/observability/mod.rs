//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`request_id`, `client`, `path`, `status`) on every event
//! - Request ID flows from the gateway to the backend
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
