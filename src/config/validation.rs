//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, rates, limits, TTLs)
//! - Check cache globs compile and listener ports do not collide
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EdgewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashMap;
use std::fmt;

use crate::cache::rules::glob_to_regex;
use crate::config::schema::{CacheRuleConfig, EdgewayConfig};

/// A single semantic problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_rules(section: &str, rules: &[CacheRuleConfig], errors: &mut Vec<ValidationError>) {
    for (i, rule) in rules.iter().enumerate() {
        let field = format!("{section}[{i}]");
        if rule.ttl_seconds == 0 {
            errors.push(ValidationError::new(&field, "ttl_seconds must be > 0"));
        }
        if !rule.path_glob.starts_with('/') {
            errors.push(ValidationError::new(&field, "path_glob must start with '/'"));
        } else if let Err(err) = glob_to_regex(&rule.path_glob) {
            errors.push(ValidationError::new(&field, format!("invalid glob: {err}")));
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &EdgewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut listeners: HashMap<(String, u16), &str> = HashMap::new();
    let mut listener = |name: &'static str, host: &str, port: u16, errors: &mut Vec<ValidationError>| {
        if port == 0 {
            errors.push(ValidationError::new(format!("{name}.port"), "must be non-zero"));
            return;
        }
        if let Some(other) = listeners.insert((host.to_string(), port), name) {
            errors.push(ValidationError::new(
                format!("{name}.port"),
                format!("{host}:{port} already used by {other}"),
            ));
        }
    };

    if let Some(gateway) = &config.gateway {
        listener("gateway", &gateway.host, gateway.port, &mut errors);
        if gateway.backend_port == 0 {
            errors.push(ValidationError::new("gateway.backend_port", "must be non-zero"));
        }
        if gateway.max_concurrent == 0 {
            errors.push(ValidationError::new("gateway.max_concurrent", "must be >= 1"));
        }
        let rl = &gateway.rate_limit;
        if rl.enabled {
            if !(rl.requests_per_second > 0.0 && rl.requests_per_second.is_finite()) {
                errors.push(ValidationError::new(
                    "gateway.rate_limit.requests_per_second",
                    "must be > 0",
                ));
            }
            if rl.burst == 0 {
                errors.push(ValidationError::new("gateway.rate_limit.burst", "must be >= 1"));
            }
            if rl.idle_eviction_secs == 0 {
                errors.push(ValidationError::new(
                    "gateway.rate_limit.idle_eviction_secs",
                    "must be > 0",
                ));
            }
        }
        if gateway.require_api_key && gateway.valid_api_keys.iter().all(|k| k.is_empty()) {
            errors.push(ValidationError::new(
                "gateway.valid_api_keys",
                "at least one non-empty key is required when require_api_key is set",
            ));
        }
        if gateway.api_key_header.is_empty() {
            errors.push(ValidationError::new("gateway.api_key_header", "must not be empty"));
        }
        for path in gateway.static_routes.keys() {
            if !path.starts_with('/') {
                errors.push(ValidationError::new(
                    format!("gateway.static_routes.{path}"),
                    "path must start with '/'",
                ));
            }
        }
        check_rules("gateway.cache_rules", &gateway.cache_rules, &mut errors);
    }

    if let Some(cache) = &config.cache {
        listener("cache", &cache.host, cache.port, &mut errors);
        if cache.backend_port == 0 {
            errors.push(ValidationError::new("cache.backend_port", "must be non-zero"));
        }
        if cache.sweep_interval_secs == 0 {
            errors.push(ValidationError::new("cache.sweep_interval_secs", "must be > 0"));
        }
        check_rules("cache.rules", &cache.rules, &mut errors);
    }

    if let Some(stream) = &config.stream {
        listener("stream", &stream.host, stream.port, &mut errors);
        if stream.max_connections == 0 {
            errors.push(ValidationError::new("stream.max_connections", "must be >= 1"));
        }
        if stream.channel_capacity == 0 {
            errors.push(ValidationError::new("stream.channel_capacity", "must be >= 1"));
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }
    if config.timeouts.backend_secs == 0 {
        errors.push(ValidationError::new("timeouts.backend_secs", "must be > 0"));
    }
    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
