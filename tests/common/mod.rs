//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::any,
    Json, Router,
};
use tokio::net::TcpListener;

use edgeway::cache::CacheServer;
use edgeway::config::{CacheConfig, GatewayConfig, RetryConfig, StreamConfig, TimeoutConfig};
use edgeway::gateway::GatewayServer;
use edgeway::lifecycle::Shutdown;
use edgeway::stream::{StreamHandle, StreamServer};

/// A mock backend and the number of requests it has served.
pub struct MockBackend {
    pub addr: SocketAddr,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Start a backend on an ephemeral port.
///
/// - `/status/{code}` answers with that status
/// - `/sleep/{ms}` answers after a delay
/// - `/drip/{ms}` sends headers at once and the body after a delay
/// - anything else echoes the request as JSON
pub async fn start_mock_backend() -> MockBackend {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/status/{code}", any(status))
        .route("/sleep/{ms}", any(sleep))
        .route("/drip/{ms}", any(drip))
        .route("/", any(echo))
        .route("/{*path}", any(echo))
        .with_state(Arc::clone(&calls));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    MockBackend { addr, calls }
}

async fn echo(
    State(calls): State<Arc<AtomicUsize>>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(serde_json::json!({
        "call": n,
        "method": method.as_str(),
        "path": uri.path(),
        "query": query,
        "x_forwarded_for": header("x-forwarded-for"),
        "x_request_id": header("x-request-id"),
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn status(State(calls): State<Arc<AtomicUsize>>, Path(code): Path<u16>) -> impl IntoResponse {
    calls.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, format!("status {code}"))
}

async fn sleep(State(calls): State<Arc<AtomicUsize>>, Path(ms): Path<u64>) -> impl IntoResponse {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "slept"
}

async fn drip(State(calls): State<Arc<AtomicUsize>>, Path(ms): Path<u64>) -> impl IntoResponse {
    calls.fetch_add(1, Ordering::SeqCst);
    let body = futures_util::stream::once(async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, std::convert::Infallible>(Bytes::from_static(b"dripped"))
    });
    Body::from_stream(body)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn gateway_config(backend: SocketAddr) -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".into(),
        port: 0,
        backend_host: backend.ip().to_string(),
        backend_port: backend.port(),
        ..GatewayConfig::default()
    }
}

pub async fn start_gateway(
    config: GatewayConfig,
    timeouts: TimeoutConfig,
    shutdown: &Shutdown,
) -> SocketAddr {
    let server = GatewayServer::new(&config, &timeouts, &RetryConfig::default()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    addr
}

pub async fn start_cache(config: CacheConfig, shutdown: &Shutdown) -> SocketAddr {
    let server =
        CacheServer::new(&config, &TimeoutConfig::default(), &RetryConfig::default()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    addr
}

pub async fn start_stream(config: StreamConfig, shutdown: &Shutdown) -> (SocketAddr, StreamHandle) {
    let server = StreamServer::new(&config);
    let handle = server.handle();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    (addr, handle)
}

/// HTTP client that never reuses connections or reads proxy settings.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
