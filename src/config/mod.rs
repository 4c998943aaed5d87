//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EdgewayConfig (validated, immutable)
//!     → sections handed to the servers that need them
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CacheConfig, CacheRuleConfig, EdgewayConfig, EngineConfig, GatewayConfig, LogFormat,
    ObservabilityConfig, QueryPolicy, RateLimitConfig, RetryConfig, StreamConfig, TimeoutConfig,
};
pub use validation::ValidationError;
