//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::EdgewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<EdgewayConfig, ConfigError> {
    let config: EdgewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EdgewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryPolicy;
    use crate::engine::EnginePreference;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.gateway.is_none());
        assert_eq!(config.engine.preference, EnginePreference::Auto);
        assert_eq!(config.retries.max_attempts, 1);
    }

    #[test]
    fn full_sections_parse() {
        let config = parse_config(
            r#"
            [engine]
            preference = "fallback"

            [gateway]
            port = 9000
            backend_port = 9001
            max_concurrent = 4
            require_api_key = true
            valid_api_keys = ["k1"]

            [gateway.rate_limit]
            requests_per_second = 10.0
            burst = 10

            [gateway.static_routes]
            "/health" = { status = "ok" }

            [cache]
            port = 9002
            query_policy = "ignore"
            rules = [{ path_glob = "/users/*", ttl_seconds = 60 }]

            [stream]
            port = 9003
            max_connections = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.preference, EnginePreference::Fallback);
        let gateway = config.gateway.unwrap();
        assert_eq!(gateway.max_concurrent, 4);
        assert_eq!(gateway.api_key_header, "x-api-key");
        assert_eq!(gateway.static_routes["/health"]["status"], "ok");
        let cache = config.cache.unwrap();
        assert_eq!(cache.query_policy, QueryPolicy::Ignore);
        assert_eq!(cache.rules[0].ttl_seconds, 60);
        assert_eq!(config.stream.unwrap().max_connections, 2);
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        assert!(matches!(parse_config("[gateway"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn semantic_errors_are_collected() {
        let err = parse_config(
            r#"
            [gateway]
            port = 0
            max_concurrent = 0
            "#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
