//! Items API behind CORS and bearer auth, served by the selected engine.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use edgeway::engine::select_engine;
use edgeway::http::middleware::{BearerAuth, CorsMiddleware, StaticTokens};
use edgeway::lifecycle::Shutdown;
use edgeway::{handler_fn, ApiError, App, EnginePreference, Request, Response};

mod common;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Item {
    #[serde(default)]
    id: u64,
    name: String,
}

type Store = Arc<Mutex<BTreeMap<u64, Item>>>;

fn items_app(store: Store) -> App {
    let create_store = Arc::clone(&store);
    App::builder()
        .middleware(CorsMiddleware::permissive())
        .middleware(BearerAuth::new(StaticTokens::new().with_token("t0ken", "alice")))
        .post(
            "/api/items",
            handler_fn(move |mut req: Request| {
                let store = Arc::clone(&create_store);
                async move {
                    let mut item: Item = req.json().await?;
                    let mut items = store.lock().map_err(ApiError::handler)?;
                    item.id = items.len() as u64 + 1;
                    items.insert(item.id, item.clone());
                    Ok(Response::json(StatusCode::CREATED, &item))
                }
            }),
        )
        .get(
            "/api/items/{id}",
            handler_fn(move |req: Request| {
                let store = Arc::clone(&store);
                async move {
                    let id: u64 = req
                        .path_param("id")
                        .and_then(|id| id.parse().ok())
                        .ok_or_else(|| ApiError::RouteNotFound(req.path().to_string()))?;
                    let items = store.lock().map_err(ApiError::handler)?;
                    match items.get(&id) {
                        Some(item) => Ok(Response::json(StatusCode::OK, item)),
                        None => Err(ApiError::RouteNotFound(req.path().to_string())),
                    }
                }
            }),
        )
        .build()
        .unwrap()
}

async fn start() -> (SocketAddr, Shutdown) {
    let shutdown = Shutdown::new();
    let engine = select_engine(EnginePreference::Auto).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Arc::new(items_app(Store::default()));
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = engine.serve(app, listener, rx).await;
    });
    (addr, shutdown)
}

#[tokio::test]
async fn create_requires_bearer_token() {
    let (addr, shutdown) = start().await;
    let client = common::client();
    let url = format!("http://{addr}/api/items");

    let res = client
        .post(&url)
        .json(&serde_json::json!({"name": "widget"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"error": "Unauthorized", "status": 401}));

    let res = client
        .post(&url)
        .bearer_auth("t0ken")
        .json(&serde_json::json!({"name": "widget"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
    let created: serde_json::Value = res.json().await.unwrap();
    assert_eq!(created["id"], 1);
    assert_eq!(created["name"], "widget");

    let res = client
        .get(format!("{url}/1"))
        .bearer_auth("t0ken")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let fetched: serde_json::Value = res.json().await.unwrap();
    assert_eq!(fetched, created);

    shutdown.trigger();
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let (addr, shutdown) = start().await;
    let res = common::client()
        .post(format!("http://{addr}/api/items"))
        .bearer_auth("t0ken")
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    shutdown.trigger();
}

#[tokio::test]
async fn preflight_skips_auth() {
    let (addr, shutdown) = start().await;
    let res = common::client()
        .request(reqwest::Method::OPTIONS, format!("http://{addr}/api/items"))
        .header("origin", "https://app.example")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 204);
    assert!(res.headers().contains_key("access-control-allow-methods"));

    shutdown.trigger();
}

#[tokio::test]
async fn routing_errors_use_json_bodies() {
    let (addr, shutdown) = start().await;
    let client = common::client();

    let res = client.get(format!("http://{addr}/nowhere")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], 404);

    let res = client.delete(format!("http://{addr}/api/items")).send().await.unwrap();
    assert_eq!(res.status(), 405);
    assert_eq!(res.headers()["allow"], "POST");

    shutdown.trigger();
}
