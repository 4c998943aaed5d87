//! Accelerator gateway.
//!
//! # Data Flow
//! ```text
//! client request
//!     → rate limit (429)
//!     → admission (503)
//!     → static_routes.rs (200, local JSON)
//!     → API key (401)
//!     → cache (HIT)
//!     → forward.rs → backend (relayed verbatim, 502 when unreachable)
//! ```

pub mod forward;
pub mod server;
pub mod static_routes;

pub use forward::Forwarder;
pub use server::GatewayServer;
pub use static_routes::StaticRoutes;
