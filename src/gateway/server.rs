//! Gateway HTTP server.
//!
//! # Responsibilities
//! - Apply the request pipeline in its fixed order
//! - Record one outcome metric per request
//! - Run the background sweeps for the limiter and the cache
//!
//! # Design Decisions
//! - Every stage short-circuits; a rejected request never reaches a later stage
//! - The admission guard travels with the response body, so the slot is held
//!   until the body has been relayed to the client or dropped

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

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

use crate::cache::{serve_through_cache, ResponseCache};
use crate::config::{GatewayConfig, RetryConfig, TimeoutConfig};
use crate::error::{ApiError, StartupError};
use crate::gateway::forward::Forwarder;
use crate::gateway::static_routes::StaticRoutes;
use crate::observability::metrics::{self, Outcome};
use crate::security::headers::{request_id, UuidRequestId};
use crate::security::{client_key, AdmissionControl, AdmissionGuard, ApiKeyValidator, RateLimiter};

/// Shared per-gateway state.
struct GatewayState {
    limiter: Option<Arc<RateLimiter>>,
    key_header: Option<String>,
    admission: Arc<AdmissionControl>,
    static_routes: StaticRoutes,
    api_keys: Option<ApiKeyValidator>,
    cache: Option<Arc<ResponseCache>>,
    forwarder: Forwarder,
}

/// Rate-limited, load-shedding reverse proxy in front of one backend.
pub struct GatewayServer {
    state: Arc<GatewayState>,
    cache_sweep_interval: Duration,
}

impl GatewayServer {
    pub fn new(
        config: &GatewayConfig,
        timeouts: &TimeoutConfig,
        retries: &RetryConfig,
    ) -> Result<Self, StartupError> {
        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::from_config(&config.rate_limit)));

        let api_keys = if config.require_api_key {
            Some(ApiKeyValidator::new(
                &config.api_key_header,
                config.valid_api_keys.iter().cloned(),
            )?)
        } else {
            None
        };

        let cache = if config.cache_rules.is_empty() {
            None
        } else {
            Some(Arc::new(ResponseCache::from_config(
                &config.cache_rules,
                config.cache_query_policy,
            )?))
        };

        let forwarder =
            Forwarder::new(&config.backend_host, config.backend_port, timeouts, retries)?;

        Ok(Self {
            state: Arc::new(GatewayState {
                limiter,
                key_header: config.rate_limit.key_header.clone(),
                admission: AdmissionControl::new(config.max_concurrent),
                static_routes: StaticRoutes::new(&config.static_routes),
                api_keys,
                cache,
                forwarder,
            }),
            cache_sweep_interval: Duration::from_secs(config.cache_sweep_interval_secs),
        })
    }

    /// The gateway's cache, when cache rules are configured.
    pub fn cache(&self) -> Option<Arc<ResponseCache>> {
        self.state.cache.clone()
    }

    pub fn admission(&self) -> Arc<AdmissionControl> {
        Arc::clone(&self.state.admission)
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
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
            max_concurrent = self.state.admission.max_concurrent(),
            rate_limited = self.state.limiter.is_some(),
            api_key_required = self.state.api_keys.is_some(),
            static_routes = self.state.static_routes.len(),
            cache = self.state.cache.is_some(),
            "Gateway starting"
        );

        let mut sweepers = Vec::new();
        if let Some(limiter) = &self.state.limiter {
            sweepers.push(limiter.spawn_sweeper(shutdown.resubscribe()));
        }
        if let Some(cache) = &self.state.cache {
            sweepers.push(cache.spawn_sweeper(self.cache_sweep_interval, shutdown.resubscribe()));
        }

        let app = self
            .build_router()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        for sweeper in sweepers {
            sweeper.abort();
        }
        tracing::info!("Gateway stopped");
        Ok(())
    }
}

fn reject(err: ApiError, outcome: Outcome, started: Instant) -> Response {
    metrics::record_gateway_request(outcome, started);
    IntoResponse::into_response(err)
}

/// Tie `slot` to the response body so it is released once relaying ends.
fn hold_slot(response: Response, slot: AdmissionGuard) -> Response {
    response.map(|body| {
        Body::new(body.map_frame(move |frame| {
            let _held = &slot;
            frame
        }))
    })
}

async fn gateway_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let started = Instant::now();
    let request_id = request_id(request.headers()).unwrap_or("unknown").to_string();
    let client = peer.ip();

    // 1. Rate limit
    if let Some(limiter) = &state.limiter {
        let key = client_key(request.headers(), client, state.key_header.as_deref());
        if !limiter.check(&key) {
            metrics::record_rate_limited();
            tracing::warn!(request_id = %request_id, client = %key, "Rate limit exceeded");
            return reject(ApiError::RateLimitExceeded, Outcome::RateLimited, started);
        }
    }

    // 2. Admission
    let Some(slot) = state.admission.try_admit() else {
        tracing::warn!(
            request_id = %request_id,
            in_flight = state.admission.in_flight(),
            "Shedding request at capacity"
        );
        return reject(ApiError::AdmissionRejected, Outcome::Shed, started);
    };

    // 3. Static routes
    if let Some(response) = state.static_routes.respond(request.uri().path()) {
        metrics::record_gateway_request(Outcome::Static, started);
        return response;
    }

    // 4. API key
    if let Some(validator) = &state.api_keys {
        if let Err(err) = validator.validate(request.headers()) {
            tracing::warn!(request_id = %request_id, client = %client, "Rejected API key");
            return reject(err, Outcome::Unauthorized, started);
        }
    }

    let path = request.uri().path().to_string();

    // 5. Cache, 6. Forward
    let plan = state
        .cache
        .as_ref()
        .and_then(|cache| cache.plan(request.method(), request.uri()).map(|plan| (cache, plan)));
    let result = match plan {
        Some((cache, plan)) => {
            serve_through_cache(cache, plan, &state.forwarder, request, client, &request_id).await
        }
        None => state.forwarder.forward(request, client, &request_id).await,
    };

    match result {
        Ok(response) => {
            let hit = response
                .headers()
                .get(crate::cache::X_CACHE)
                .is_some_and(|v| v == "HIT");
            let outcome = if hit { Outcome::CacheHit } else { Outcome::Forwarded };
            metrics::record_gateway_request(outcome, started);
            tracing::debug!(
                request_id = %request_id,
                path = %path,
                status = response.status().as_u16(),
                "Gateway response"
            );
            hold_slot(response, slot)
        }
        Err(err) => {
            tracing::warn!(request_id = %request_id, path = %path, error = %err, "Forwarding failed");
            reject(err, Outcome::BackendError, started)
        }
    }
}
