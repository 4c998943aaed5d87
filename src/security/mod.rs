//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming gateway request:
//!     → rate_limit.rs (per-client token bucket)
//!     → admission.rs (in-flight ceiling)
//!     → api_key.rs (allow-set check)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-For)
//!     → Forward to backend
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - Rejections are immediate; nothing queues
//! - No trust in client input

pub mod admission;
pub mod api_key;
pub mod headers;
pub mod rate_limit;

pub use admission::{AdmissionControl, AdmissionGuard};
pub use api_key::ApiKeyValidator;
pub use rate_limit::{client_key, RateLimiter};
