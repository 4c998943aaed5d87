//! Request handling.
//!
//! # Responsibilities
//! - Wrap the transport request with parsed query and path parameters
//! - Read the body lazily, enforcing the size limit while streaming
//! - Expose typed accessors for handlers and middleware
//!
//! # Design Decisions
//! - Query keys keep every value in arrival order (`?tag=a&tag=b`)
//! - Body is read at most once; later reads return the buffered bytes
//! - Declared `Content-Length` over the limit is rejected before reading

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::de::DeserializeOwned;

use crate::error::{ApiError, ApiResult};
use crate::routing::PathParams;

/// Default request body limit (1 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Query string parameters, each key mapping to its values in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Parse a raw query string (without the leading `?`).
    pub fn parse(raw: &str) -> Self {
        let pairs = raw
            .split('&')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (key, value) = part.split_once('=').unwrap_or((part, ""));
                (decode_component(key), decode_component(value))
            })
            .collect();
        Self { pairs }
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Stable encoding with pairs sorted by key, then value.
    pub fn canonical(&self) -> String {
        let mut pairs: Vec<_> = self.pairs.iter().collect();
        pairs.sort();
        pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

#[derive(Debug)]
enum RequestBody {
    Streaming(Body),
    Buffered(Bytes),
}

/// An incoming request as seen by handlers and middleware.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    query: QueryParams,
    body: RequestBody,
    path_params: PathParams,
    remote_addr: Option<SocketAddr>,
    extensions: Extensions,
    body_limit: usize,
}

impl Request {
    /// Wrap a transport request.
    pub fn from_http(
        request: axum::http::Request<Body>,
        remote_addr: Option<SocketAddr>,
        body_limit: usize,
    ) -> Self {
        let (parts, body) = request.into_parts();
        let query = parts.uri.query().map(QueryParams::parse).unwrap_or_default();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            query,
            body: RequestBody::Streaming(body),
            path_params: PathParams::new(),
            remote_addr,
            extensions: parts.extensions,
            body_limit,
        }
    }

    /// Build a request directly, mostly for tests and in-process calls.
    pub fn new(method: Method, uri: &str) -> Self {
        let uri: Uri = uri.parse().unwrap_or_else(|_| Uri::from_static("/"));
        let query = uri.query().map(QueryParams::parse).unwrap_or_default();
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            query,
            body: RequestBody::Buffered(Bytes::new()),
            path_params: PathParams::new(),
            remote_addr: None,
            extensions: Extensions::new(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Buffered(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name)
    }

    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    pub(crate) fn set_path_params(&mut self, params: PathParams) {
        self.path_params = params;
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key)
    }

    pub fn query_all(&self, key: &str) -> Vec<&str> {
        self.query.get_all(key)
    }

    pub fn query_params(&self) -> &QueryParams {
        &self.query
    }

    /// Header value as a string; non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Read the whole body.
    pub async fn bytes(&mut self) -> ApiResult<Bytes> {
        let body = match std::mem::replace(&mut self.body, RequestBody::Buffered(Bytes::new())) {
            RequestBody::Buffered(bytes) => {
                self.body = RequestBody::Buffered(bytes.clone());
                return Ok(bytes);
            }
            RequestBody::Streaming(body) => body,
        };

        let limit = self.body_limit;
        let declared = self
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(ApiError::PayloadTooLarge { limit });
        }

        let collected = Limited::new(body, limit).collect().await.map_err(|err| {
            if err.downcast_ref::<LengthLimitError>().is_some() {
                ApiError::PayloadTooLarge { limit }
            } else {
                ApiError::MalformedBody(err.to_string())
            }
        })?;

        let bytes = collected.to_bytes();
        self.body = RequestBody::Buffered(bytes.clone());
        Ok(bytes)
    }

    /// Read and deserialize a JSON body.
    pub async fn json<T: DeserializeOwned>(&mut self) -> ApiResult<T> {
        let bytes = self.bytes().await?;
        if bytes.is_empty() {
            return Err(ApiError::MalformedBody("empty body".to_string()));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_keeps_repeated_values_in_order() {
        let query = QueryParams::parse("tag=b&tag=a&q=hello+world&empty");
        assert_eq!(query.get("tag"), Some("b"));
        assert_eq!(query.get_all("tag"), vec!["b", "a"]);
        assert_eq!(query.get("q"), Some("hello world"));
        assert_eq!(query.get("empty"), Some(""));
        assert_eq!(query.canonical(), "empty=&q=hello%20world&tag=a&tag=b");
    }

    #[tokio::test]
    async fn json_body_is_parsed_once() {
        let mut request = Request::new(Method::POST, "/items?x=1").with_body(r#"{"name":"x"}"#);
        let first: serde_json::Value = request.json().await.unwrap();
        let second: serde_json::Value = request.json().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first["name"], "x");
        assert_eq!(request.query("x"), Some("1"));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let mut request = Request::new(Method::POST, "/items").with_body("{not json");
        let err = request.json::<serde_json::Value>().await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn streaming_body_over_limit_is_rejected() {
        let http = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(Body::from(vec![b'a'; 64]))
            .unwrap();
        let mut request = Request::from_http(http, None, 16);
        assert!(matches!(
            request.bytes().await,
            Err(ApiError::PayloadTooLarge { limit: 16 })
        ));
    }

    #[tokio::test]
    async fn declared_length_over_limit_is_rejected() {
        let http = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(header::CONTENT_LENGTH, "1000")
            .body(Body::empty())
            .unwrap();
        let mut request = Request::from_http(http, None, 16);
        assert!(matches!(
            request.bytes().await,
            Err(ApiError::PayloadTooLarge { .. })
        ));
    }
}
