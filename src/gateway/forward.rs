//! Backend forwarding.
//!
//! # Responsibilities
//! - Rewrite the request URI to the backend authority
//! - Strip hop-by-hop headers, add X-Forwarded-For and X-Request-ID
//! - Enforce the backend deadline (time to response headers)
//! - Retry connection failures for idempotent methods when configured
//!
//! # Design Decisions
//! - The body streams through unless a retry might need to replay it
//! - Backend status codes are relayed verbatim, 5xx included

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderValue, Request, Uri, Version};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::{RetryConfig, TimeoutConfig};
use crate::error::{ApiError, StartupError};
use crate::resilience::RetryPolicy;
use crate::security::headers::{append_forwarded_for, strip_hop_by_hop, X_REQUEST_ID};

/// Proxies requests to one backend address.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    authority: Authority,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Forwarder {
    pub fn new(
        backend_host: &str,
        backend_port: u16,
        timeouts: &TimeoutConfig,
        retries: &RetryConfig,
    ) -> Result<Self, StartupError> {
        let address = format!("{backend_host}:{backend_port}");
        let authority = Authority::from_str(&address)
            .map_err(|_| StartupError::InvalidAddress(address.clone()))?;

        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            authority,
            timeout: Duration::from_secs(timeouts.backend_secs),
            retry: RetryPolicy::from_config(retries),
        })
    }

    pub fn backend(&self) -> &Authority {
        &self.authority
    }

    fn backend_uri(&self, original: &Uri) -> Result<Uri, ApiError> {
        let path_and_query = original
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|err| ApiError::MalformedBody(err.to_string()))
    }

    /// Forward `request` and return the backend's response.
    pub async fn forward(
        &self,
        request: Request<Body>,
        client_ip: IpAddr,
        request_id: &str,
    ) -> Result<axum::response::Response, ApiError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = self.backend_uri(&parts.uri)?;
        strip_hop_by_hop(&mut parts.headers);
        append_forwarded_for(&mut parts.headers, client_ip);
        if let Ok(value) = HeaderValue::from_str(request_id) {
            parts.headers.insert(X_REQUEST_ID, value);
        }

        let attempts = self.retry.attempts_for(&parts.method);
        let mut streaming = Some(body);
        let replay: Option<Bytes> = match streaming.take() {
            Some(body) if attempts > 1 => {
                let collected = body
                    .collect()
                    .await
                    .map_err(|err| ApiError::MalformedBody(err.to_string()))?;
                Some(collected.to_bytes())
            }
            other => {
                streaming = other;
                None
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let body = match (&replay, streaming.take()) {
                (Some(bytes), _) => Body::from(bytes.clone()),
                (None, Some(body)) => body,
                (None, None) => Body::empty(),
            };
            let mut outgoing = Request::new(body);
            *outgoing.method_mut() = parts.method.clone();
            *outgoing.uri_mut() = parts.uri.clone();
            *outgoing.version_mut() = Version::HTTP_11;
            *outgoing.headers_mut() = parts.headers.clone();

            let result = tokio::time::timeout(self.timeout, self.client.request(outgoing)).await;
            match result {
                Ok(Ok(response)) => {
                    let (mut parts, body) = response.into_parts();
                    strip_hop_by_hop(&mut parts.headers);
                    return Ok(axum::response::Response::from_parts(parts, Body::new(body)));
                }
                Ok(Err(err)) if err.is_connect() && attempt < attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::info!(
                        request_id = %request_id,
                        backend = %self.authority,
                        attempt,
                        delay = ?delay,
                        "Retrying after connection failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(Err(err)) => {
                    tracing::error!(
                        request_id = %request_id,
                        backend = %self.authority,
                        attempt,
                        error = %err,
                        "Upstream error"
                    );
                    return Err(ApiError::BackendUnreachable(err.to_string()));
                }
                Err(_) => {
                    tracing::error!(
                        request_id = %request_id,
                        backend = %self.authority,
                        timeout = ?self.timeout,
                        "Upstream timed out"
                    );
                    return Err(ApiError::BackendUnreachable("timed out".to_string()));
                }
            }
        }
    }
}
