//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! GET/HEAD request
//!     → rules.rs (first matching glob → TTL)
//!     → store.rs (key = method + path [+ sorted query])
//!         hit  → cached response, x-cache: HIT
//!         miss → forward → 2xx stored → x-cache: MISS
//! ```
//!
//! # Design Decisions
//! - Only 2xx responses are stored
//! - Expired entries are never served; they are dropped at lookup or by the sweeper
//! - No size cap; the rule set bounds what is cacheable

pub mod rules;
pub mod server;
pub mod store;

pub use rules::{glob_to_regex, CacheRule, CacheRules};
pub use server::{serve_through_cache, CacheServer};
pub use store::{CachePlan, CachedResponse, ResponseCache, X_CACHE};
