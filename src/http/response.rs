//! Response construction.
//!
//! # Responsibilities
//! - Build responses from handlers, middleware and short-circuit stages
//! - Keep status, headers and a fully materialized body together
//! - Convert into the transport response type at the edge
//!
//! # Design Decisions
//! - Bodies are `Bytes`, so cloning a response for the cache is cheap
//! - Invalid header names/values passed to `set_header` are dropped, not panicked on

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use serde::Serialize;

/// An application response.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// Empty body with the given status.
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::empty(status)
                .with_content_type("application/json")
                .with_body(body),
            Err(err) => {
                tracing::error!(error = %err, "Failed to serialize response body");
                Self::empty(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_content_type("application/json")
                    .with_body(r#"{"error":"Internal Server Error","status":500}"#)
            }
        }
    }

    /// Plain text body.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::empty(status)
            .with_content_type("text/plain; charset=utf-8")
            .with_body(body.into())
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        self
    }

    /// Set (replace) a header.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid response header"),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Convert into the transport response.
    pub fn into_http(self) -> axum::response::Response {
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl axum::response::IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        self.into_http()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_sets_content_type() {
        let response = Response::json(StatusCode::CREATED, &serde_json::json!({"id": 1}));
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(response.body().as_ref(), br#"{"id":1}"#);
    }

    #[test]
    fn invalid_header_is_ignored() {
        let mut response = Response::empty(StatusCode::OK);
        response.set_header("bad header", "x");
        response.set_header("x-ok", "yes");
        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.header("x-ok"), Some("yes"));
    }

    #[test]
    fn into_http_keeps_parts() {
        let http = Response::text(StatusCode::ACCEPTED, "queued")
            .with_header("x-trace", "abc")
            .into_http();
        assert_eq!(http.status(), StatusCode::ACCEPTED);
        assert_eq!(http.headers()["x-trace"], "abc");
    }
}
