//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! engine and the accelerators. All types derive Serde traits for
//! deserialization from config files; every section has defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::EnginePreference;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EdgewayConfig {
    /// Execution engine selection.
    pub engine: EngineConfig,

    /// Gateway accelerator (absent = not started).
    pub gateway: Option<GatewayConfig>,

    /// Standalone cache accelerator (absent = not started).
    pub cache: Option<CacheConfig>,

    /// Stream server (absent = not started).
    pub stream: Option<StreamConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Backend retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Engine selection.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// `native`, `fallback` or `auto`. `EDGEWAY_ENGINE` overrides it.
    pub preference: EnginePreference,
}

/// Gateway accelerator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub backend_host: String,
    pub backend_port: u16,

    /// Per-client token bucket.
    pub rate_limit: RateLimitConfig,

    /// Exact path → JSON body served with 200.
    pub static_routes: BTreeMap<String, serde_json::Value>,

    /// Maximum in-flight requests before shedding with 503.
    pub max_concurrent: usize,

    pub require_api_key: bool,
    pub valid_api_keys: Vec<String>,

    /// Header carrying the API key.
    pub api_key_header: String,

    /// Optional cache stage; empty = disabled.
    pub cache_rules: Vec<CacheRuleConfig>,
    pub cache_query_policy: QueryPolicy,
    pub cache_sweep_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            backend_host: "127.0.0.1".to_string(),
            backend_port: 8000,
            rate_limit: RateLimitConfig::default(),
            static_routes: BTreeMap::new(),
            max_concurrent: 1024,
            require_api_key: false,
            valid_api_keys: Vec::new(),
            api_key_header: "x-api-key".to_string(),
            cache_rules: Vec::new(),
            cache_query_policy: QueryPolicy::default(),
            cache_sweep_interval_secs: 30,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Refill rate per client key.
    pub requests_per_second: f64,

    /// Bucket capacity.
    pub burst: u32,

    /// Header to key clients by (e.g. `x-forwarded-for`); peer IP otherwise.
    pub key_header: Option<String>,

    /// Buckets untouched for this long are evicted.
    pub idle_eviction_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 100.0,
            burst: 100,
            key_header: None,
            idle_eviction_secs: 300,
        }
    }
}

/// One cache rule: glob → TTL.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CacheRuleConfig {
    pub path_glob: String,
    pub ttl_seconds: u64,
}

/// Whether the query string is part of the cache key.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryPolicy {
    /// Sorted query string is part of the key.
    #[default]
    Include,
    /// Requests differing only in query share an entry.
    Ignore,
}

/// Standalone cache accelerator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub backend_host: String,
    pub backend_port: u16,
    pub rules: Vec<CacheRuleConfig>,
    pub query_policy: QueryPolicy,

    /// Interval of the expired-entry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            backend_host: "127.0.0.1".to_string(),
            backend_port: 8000,
            rules: Vec::new(),
            query_policy: QueryPolicy::default(),
            sweep_interval_secs: 30,
        }
    }
}

/// Stream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    pub host: String,
    pub port: u16,

    /// Connections beyond this are refused with 503.
    pub max_connections: usize,

    /// Outbound queue depth per connection.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8082,
            max_connections: 1000,
            channel_capacity: 64,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for the backend to produce response headers.
    pub backend_secs: u64,

    /// Grace period for in-flight connections on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            backend_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per request; 1 disables retries.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
