//! edgeway: request routing, dual-engine dispatch and edge accelerators.
//!
//! ```text
//!   client
//!     │
//!     ▼
//!  ┌──────────────────────── gateway ────────────────────────┐
//!  │ rate limit → admission → static → api key → cache → fwd │
//!  └──────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//!  engine (native | fallback) → router → middleware chain → handler
//! ```
//!
//! The cache and stream accelerators can also run as standalone listeners.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod stream;

pub use config::EdgewayConfig;
pub use engine::{Engine, EngineKind, EnginePreference};
pub use error::{ApiError, ApiResult, StartupError};
pub use http::{handler_fn, App, AppBuilder, Handler, Middleware, Next, Request, Response};
pub use lifecycle::Shutdown;
