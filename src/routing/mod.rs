//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route registration (at startup):
//!     (method, "/users/{id}", value)
//!     → pattern.rs (split into literal / parameter segments, validate)
//!     → router.rs (insert into segment tree, reject duplicates)
//!     → Freeze as immutable Router
//!
//! Incoming request (method, path):
//!     → router.rs (walk segments, literal before parameter)
//!     → Return: value + path params, RouteNotFound or MethodNotAllowed
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime (shared via `Arc`, no locks)
//! - A literal segment always outranks a parameter at the same position
//! - Dead ends backtrack, so `/users/me/posts` can still reach `/users/{id}/posts`
//! - Path matched with a different method is 405, not 404

pub mod pattern;
pub mod router;

pub use pattern::{Pattern, Segment};
pub use router::{PathParams, RouteMatch, Router, RouterBuilder};
