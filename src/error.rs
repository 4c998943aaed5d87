//! Error taxonomy.
//!
//! `ApiError` covers everything that can happen to a single request and knows
//! its HTTP status. `StartupError` covers configuration problems that must
//! stop the process before it serves anything.

use axum::http::{header, HeaderValue, Method, StatusCode};
use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::http::Response;

/// Per-request result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors produced while serving a request.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed {
        method: Method,
        path: String,
        allowed: Vec<Method>,
    },

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Server is at capacity")]
    AdmissionRejected,

    #[error("Invalid or missing API key")]
    InvalidApiKey,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Handler error: {0}")]
    Handler(String),
}

impl ApiError {
    /// Wrap an application failure. The message is logged, never sent.
    pub fn handler(err: impl std::fmt::Display) -> Self {
        ApiError::Handler(err.to_string())
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::AdmissionRejected => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidApiKey | ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BackendUnreachable(_) => StatusCode::BAD_GATEWAY,
            ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to put on the wire.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Handler(_) => "Internal Server Error".to_string(),
            ApiError::BackendUnreachable(_) => "Backend unreachable".to_string(),
            other => other.to_string(),
        }
    }

    /// Render as a JSON error response: `{"error": ..., "status": ...}`.
    pub fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.public_message(),
            "status": status.as_u16(),
        });
        let mut response = Response::json(status, &body);

        if let ApiError::MethodNotAllowed { allowed, .. } = &self {
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }
        response
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::MalformedBody(err.to_string())
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        ApiError::into_response(self).into_http()
    }
}

/// Fatal errors raised before serving starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Duplicate route: {method} {pattern}")]
    DuplicateRoute { method: Method, pattern: String },

    #[error("Invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },

    #[error("Invalid cache rule {glob:?}: {source}")]
    InvalidGlob {
        glob: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unknown engine preference {0:?} (expected native, fallback or auto)")]
    UnknownEngine(String),

    #[error("No execution engine is available in this build")]
    NoEngineAvailable,

    #[error("Invalid header name {0:?}")]
    InvalidHeader(String),

    #[error("Invalid address {0:?}")]
    InvalidAddress(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to install metrics exporter: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ApiError::RouteNotFound("/x".into()).status_code(), 404);
        assert_eq!(ApiError::RateLimitExceeded.status_code(), 429);
        assert_eq!(ApiError::AdmissionRejected.status_code(), 503);
        assert_eq!(ApiError::InvalidApiKey.status_code(), 401);
        assert_eq!(ApiError::BackendUnreachable("x".into()).status_code(), 502);
        assert_eq!(ApiError::MalformedBody("x".into()).status_code(), 400);
        assert_eq!(ApiError::Handler("boom".into()).status_code(), 500);
    }

    #[test]
    fn handler_detail_is_not_leaked() {
        let response = ApiError::handler("db password is hunter2").into_response();
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "Internal Server Error");
        assert_eq!(body["status"], 500);
    }

    #[test]
    fn method_not_allowed_sets_allow_header() {
        let err = ApiError::MethodNotAllowed {
            method: Method::DELETE,
            path: "/users".into(),
            allowed: vec![Method::GET, Method::POST],
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), "GET, POST");
    }
}
