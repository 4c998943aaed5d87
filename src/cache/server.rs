//! Standalone caching reverse proxy.
//!
//! Eligible requests are answered from the store when fresh; everything else
//! goes to the backend through the shared `Forwarder`. The gateway reuses
//! `serve_through_cache` for its own cache stage.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::cache::store::{CachePlan, CachedResponse, ResponseCache};
use crate::config::{CacheConfig, RetryConfig, TimeoutConfig};
use crate::error::{ApiError, StartupError};
use crate::gateway::Forwarder;
use crate::observability::metrics;
use crate::security::headers::{request_id, UuidRequestId};

/// Serve `request` from the cache, or forward it and store a 2xx result.
pub async fn serve_through_cache(
    cache: &ResponseCache,
    plan: CachePlan,
    forwarder: &Forwarder,
    request: Request<Body>,
    client_ip: IpAddr,
    request_id: &str,
) -> Result<Response, ApiError> {
    if let Some(cached) = cache.lookup(&plan.key) {
        metrics::record_cache_lookup(true);
        tracing::debug!(request_id = %request_id, key = %plan.key, "Cache hit");
        return Ok(cached.to_response(true));
    }
    metrics::record_cache_lookup(false);

    let response = forwarder.forward(request, client_ip, request_id).await?;
    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|err| ApiError::BackendUnreachable(err.to_string()))?
        .to_bytes();

    let fetched = CachedResponse {
        status: parts.status,
        headers: parts.headers,
        body,
    };
    let response = fetched.to_response(false);
    if cache.store(plan.key.clone(), fetched, plan.ttl) {
        tracing::debug!(request_id = %request_id, key = %plan.key, ttl = ?plan.ttl, "Cached response");
    }
    Ok(response)
}

struct CacheState {
    cache: Arc<ResponseCache>,
    forwarder: Forwarder,
}

/// Caching proxy in front of one backend.
pub struct CacheServer {
    state: Arc<CacheState>,
    sweep_interval: Duration,
}

impl CacheServer {
    pub fn new(
        config: &CacheConfig,
        timeouts: &TimeoutConfig,
        retries: &RetryConfig,
    ) -> Result<Self, StartupError> {
        let cache = ResponseCache::from_config(&config.rules, config.query_policy)?;
        let forwarder = Forwarder::new(&config.backend_host, config.backend_port, timeouts, retries)?;
        Ok(Self {
            state: Arc::new(CacheState {
                cache: Arc::new(cache),
                forwarder,
            }),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        })
    }

    /// The store backing this server.
    pub fn cache(&self) -> Arc<ResponseCache> {
        Arc::clone(&self.state.cache)
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/{*path}", any(cache_handler))
            .route("/", any(cache_handler))
            .with_state(Arc::clone(&self.state))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Serve until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backend = %self.state.forwarder.backend(),
            rules = self.state.cache.rules().len(),
            "Cache server starting"
        );

        let sweeper = self
            .state
            .cache
            .spawn_sweeper(self.sweep_interval, shutdown.resubscribe());

        let app = self
            .build_router()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        sweeper.abort();
        tracing::info!("Cache server stopped");
        Ok(())
    }
}

async fn cache_handler(
    State(state): State<Arc<CacheState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let request_id = request_id(request.headers()).unwrap_or("unknown").to_string();

    let result = match state.cache.plan(request.method(), request.uri()) {
        Some(plan) => {
            serve_through_cache(
                &state.cache,
                plan,
                &state.forwarder,
                request,
                peer.ip(),
                &request_id,
            )
            .await
        }
        None => state.forwarder.forward(request, peer.ip(), &request_id).await,
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(request_id = %request_id, error = %err, "Cache proxy request failed");
            IntoResponse::into_response(err)
        }
    }
}
