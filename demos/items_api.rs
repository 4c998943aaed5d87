//! Items API behind CORS and bearer auth.
//!
//! ```text
//! cargo run --example items_api
//! curl -X POST localhost:8000/api/items -H 'authorization: Bearer demo-token' \
//!      -d '{"name":"widget"}'
//! ```
//!
//! `EDGEWAY_ENGINE=fallback` switches to the single-loop engine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use edgeway::engine::select_engine;
use edgeway::http::middleware::{BearerAuth, CorsMiddleware, StaticTokens};
use edgeway::lifecycle::{bind, signals, Shutdown};
use edgeway::{handler_fn, ApiError, App, EnginePreference, Request, Response, StartupError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Item {
    #[serde(default)]
    id: u64,
    name: String,
    #[serde(default)]
    tags: Vec<String>,
}

type Store = Arc<Mutex<BTreeMap<u64, Item>>>;

fn build_app(store: Store) -> Result<App, StartupError> {
    let list = Arc::clone(&store);
    let create = Arc::clone(&store);
    let fetch = Arc::clone(&store);
    let remove = store;

    App::builder()
        .middleware(CorsMiddleware::permissive())
        .middleware(BearerAuth::new(
            StaticTokens::new().with_token("demo-token", "demo"),
        ))
        .get(
            "/api/items",
            handler_fn(move |req: Request| {
                let store = Arc::clone(&list);
                async move {
                    let tag = req.query("tag").map(str::to_string);
                    let items = store.lock().map_err(ApiError::handler)?;
                    let matching: Vec<&Item> = items
                        .values()
                        .filter(|item| tag.as_ref().map_or(true, |t| item.tags.contains(t)))
                        .collect();
                    Ok(Response::json(StatusCode::OK, &matching))
                }
            }),
        )
        .post(
            "/api/items",
            handler_fn(move |mut req: Request| {
                let store = Arc::clone(&create);
                async move {
                    let mut item: Item = req.json().await?;
                    let mut items = store.lock().map_err(ApiError::handler)?;
                    item.id = items.keys().next_back().map_or(1, |last| last + 1);
                    items.insert(item.id, item.clone());
                    Ok(Response::json(StatusCode::CREATED, &item))
                }
            }),
        )
        .get(
            "/api/items/{id}",
            handler_fn(move |req: Request| {
                let store = Arc::clone(&fetch);
                async move {
                    let id = item_id(&req)?;
                    let items = store.lock().map_err(ApiError::handler)?;
                    items
                        .get(&id)
                        .map(|item| Response::json(StatusCode::OK, item))
                        .ok_or_else(|| ApiError::RouteNotFound(req.path().to_string()))
                }
            }),
        )
        .delete(
            "/api/items/{id}",
            handler_fn(move |req: Request| {
                let store = Arc::clone(&remove);
                async move {
                    let id = item_id(&req)?;
                    let mut items = store.lock().map_err(ApiError::handler)?;
                    match items.remove(&id) {
                        Some(_) => Ok(Response::empty(StatusCode::NO_CONTENT)),
                        None => Err(ApiError::RouteNotFound(req.path().to_string())),
                    }
                }
            }),
        )
        .build()
}

fn item_id(req: &Request) -> Result<u64, ApiError> {
    req.path_param("id")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| ApiError::RouteNotFound(req.path().to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgeway=debug,info".into()),
        )
        .init();

    let app = Arc::new(build_app(Store::default())?);
    let engine = select_engine(EnginePreference::Auto)?;
    let listener = bind("127.0.0.1", 8000).await?;
    tracing::info!(address = %listener.local_addr()?, engine = %engine.kind(), "Items API listening");

    let shutdown = Shutdown::new();
    let server = tokio::spawn({
        let rx = shutdown.subscribe();
        async move { engine.serve(app, listener, rx).await }
    });

    signals::wait().await;
    shutdown.trigger();
    server.await??;
    Ok(())
}
