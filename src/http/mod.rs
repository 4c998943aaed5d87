//! HTTP application surface.
//!
//! # Data Flow
//! ```text
//! engine (hyper connection)
//!     → app.rs (wrap request, match route)
//!     → request.rs (query, headers, lazy body, path params)
//!     → middleware/ (composed chain, outermost first)
//!     → handler.rs (application code)
//!     → response.rs (status, headers, body)
//!     → Send to client
//! ```

pub mod app;
pub mod handler;
pub mod middleware;
pub mod request;
pub mod response;

pub use app::{App, AppBuilder};
pub use handler::{handler_fn, Handler, HandlerFn};
pub use middleware::{Endpoint, Middleware, Next};
pub use request::{QueryParams, Request};
pub use response::Response;
