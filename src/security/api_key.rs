//! API key validation for the gateway.

use std::collections::HashSet;

use axum::http::{HeaderMap, HeaderName};

use crate::error::{ApiError, StartupError};

/// Allow-set of API keys read from one request header.
#[derive(Debug, Clone)]
pub struct ApiKeyValidator {
    header: HeaderName,
    keys: HashSet<String>,
}

impl ApiKeyValidator {
    pub fn new<I, S>(header: &str, keys: I) -> Result<Self, StartupError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let header = HeaderName::from_bytes(header.to_ascii_lowercase().as_bytes())
            .map_err(|_| StartupError::InvalidHeader(header.to_string()))?;
        let keys = keys
            .into_iter()
            .map(Into::into)
            .filter(|key: &String| !key.is_empty())
            .collect();
        Ok(Self { header, keys })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Absent and unknown keys are both `InvalidApiKey`.
    pub fn validate(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let key = headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::InvalidApiKey)?;
        if self.keys.contains(key) {
            Ok(())
        } else {
            Err(ApiError::InvalidApiKey)
        }
    }
}
