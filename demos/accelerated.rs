//! Gateway, cache and stream accelerators in front of a small backend app.
//!
//! ```text
//! :8080 gateway  → rate limit, static /health and /version, API key, cache → :8000
//! :8081 cache    → /api/** cached for 30s → :8000
//! :8082 stream   → /ws and /sse, a clock tick broadcast every 5s
//! :8000 backend  → edgeway App on the selected engine
//! ```
//!
//! ```text
//! cargo run --example accelerated
//! curl localhost:8080/health
//! curl -H 'x-api-key: demo-key' localhost:8080/api/hello
//! curl -N localhost:8082/sse
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;

use edgeway::config::{
    CacheConfig, CacheRuleConfig, EdgewayConfig, GatewayConfig, RateLimitConfig, StreamConfig,
};
use edgeway::engine::select_engine;
use edgeway::lifecycle::{bind, signals, start_accelerators, Shutdown};
use edgeway::observability::logging;
use edgeway::{handler_fn, App, Request, Response};

fn config() -> EdgewayConfig {
    let mut static_routes = BTreeMap::new();
    static_routes.insert("/health".to_string(), serde_json::json!({"status": "ok"}));
    static_routes.insert(
        "/version".to_string(),
        serde_json::json!({"name": "edgeway", "version": env!("CARGO_PKG_VERSION")}),
    );

    let api_rule = CacheRuleConfig {
        path_glob: "/api/**".into(),
        ttl_seconds: 30,
    };

    EdgewayConfig {
        gateway: Some(GatewayConfig {
            rate_limit: RateLimitConfig {
                requests_per_second: 100.0,
                burst: 200,
                ..RateLimitConfig::default()
            },
            static_routes,
            require_api_key: true,
            valid_api_keys: vec!["demo-key".into()],
            cache_rules: vec![api_rule.clone()],
            ..GatewayConfig::default()
        }),
        cache: Some(CacheConfig {
            rules: vec![api_rule],
            ..CacheConfig::default()
        }),
        stream: Some(StreamConfig::default()),
        ..EdgewayConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config();
    logging::init(&config.observability);

    let backend = App::builder()
        .get(
            "/api/hello",
            handler_fn(|req: Request| async move {
                let name = req.query("name").unwrap_or("world").to_string();
                Ok(Response::json(
                    StatusCode::OK,
                    &serde_json::json!({"message": format!("hello, {name}")}),
                ))
            }),
        )
        .build()?;

    let shutdown = Shutdown::new();
    let engine = select_engine(config.engine.preference)?;
    let listener = bind("127.0.0.1", 8000).await?;
    let backend_task = tokio::spawn({
        let rx = shutdown.subscribe();
        let app = Arc::new(backend);
        async move { engine.serve(app, listener, rx).await }
    });

    let accelerators = start_accelerators(&config, &shutdown).await?;
    if let Some(stream) = accelerators.stream_handle() {
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_secs())
                            .unwrap_or_default();
                        let delivered = stream.broadcast(&format!("{{\"tick\":{now}}}"));
                        tracing::debug!(delivered, "Broadcast tick");
                    }
                    _ = stop.recv() => break,
                }
            }
        });
    }

    signals::wait().await;
    shutdown.trigger();
    accelerators
        .join(Duration::from_secs(config.timeouts.shutdown_grace_secs))
        .await;
    backend_task.await??;
    Ok(())
}
