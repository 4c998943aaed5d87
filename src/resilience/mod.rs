//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → timeout (time to response headers, `timeouts.backend_secs`)
//!     → On connection failure: retries.rs (check if retryable, retry with backoff)
//!     → Exhausted: 502
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend call has a deadline
//! - Retries only for idempotent requests, and only when configured

pub mod retries;

pub use retries::RetryPolicy;
