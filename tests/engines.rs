//! Both engines must answer the same requests identically.

#![cfg(all(unix, feature = "native-engine", feature = "fallback-engine"))]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;

use edgeway::engine::engine_for;
use edgeway::lifecycle::Shutdown;
use edgeway::{handler_fn, ApiError, App, EngineKind, Request, Response};

mod common;

fn app() -> Arc<App> {
    let app = App::builder()
        .get(
            "/items/{id}",
            handler_fn(|req: Request| async move {
                let id = req.path_param("id").unwrap_or_default().to_string();
                let verbose = req.query("verbose").is_some();
                Ok(Response::json(
                    StatusCode::OK,
                    &serde_json::json!({"id": id, "verbose": verbose}),
                ))
            }),
        )
        .post(
            "/echo",
            handler_fn(|mut req: Request| async move {
                let body = req.bytes().await?;
                Ok(Response::empty(StatusCode::CREATED).with_body(body))
            }),
        )
        .get(
            "/fail",
            handler_fn(|_req: Request| async move {
                Err::<Response, _>(ApiError::handler("backend exploded"))
            }),
        )
        .body_limit(16)
        .build()
        .unwrap();
    Arc::new(app)
}

async fn start(kind: EngineKind, shutdown: &Shutdown) -> SocketAddr {
    let engine = engine_for(kind).unwrap();
    assert_eq!(engine.kind(), kind);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let rx = shutdown.subscribe();
    let app = app();
    tokio::spawn(async move {
        let _ = engine.serve(app, listener, rx).await;
    });
    addr
}

#[derive(Debug, PartialEq)]
struct Observed {
    status: u16,
    content_type: Option<String>,
    allow: Option<String>,
    body: Vec<u8>,
}

async fn observe(request: reqwest::RequestBuilder) -> Observed {
    let res = request.send().await.unwrap();
    let header = |name: &str| {
        res.headers()
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    };
    let status = res.status().as_u16();
    let content_type = header("content-type");
    let allow = header("allow");
    let body = res.bytes().await.unwrap().to_vec();
    Observed {
        status,
        content_type,
        allow,
        body,
    }
}

const CASES: usize = 9;

fn case(client: &reqwest::Client, a: SocketAddr, i: usize) -> reqwest::RequestBuilder {
    match i {
        0 => client.get(format!("http://{a}/items/42?verbose=1")),
        1 => client.get(format!("http://{a}/items/caf%C3%A9")),
        2 => client.head(format!("http://{a}/items/1")),
        3 => client.post(format!("http://{a}/echo")).body("hello"),
        4 => client.post(format!("http://{a}/echo")).body("x".repeat(64)),
        5 => client.delete(format!("http://{a}/items/1")),
        6 => client.request(reqwest::Method::OPTIONS, format!("http://{a}/items/1")),
        7 => client.get(format!("http://{a}/missing")),
        _ => client.get(format!("http://{a}/fail")),
    }
}

#[tokio::test]
async fn native_and_fallback_agree() {
    let shutdown = Shutdown::new();
    let native = start(EngineKind::Native, &shutdown).await;
    let fallback = start(EngineKind::Fallback, &shutdown).await;
    let client = common::client();

    for i in 0..CASES {
        let from_native = observe(case(&client, native, i)).await;
        let from_fallback = observe(case(&client, fallback, i)).await;
        assert_eq!(from_native, from_fallback, "case {i}");
    }

    let sample = observe(case(&client, native, 0)).await;
    assert_eq!(sample.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&sample.body).unwrap();
    assert_eq!(body, serde_json::json!({"id": "42", "verbose": true}));

    let decoded = observe(case(&client, fallback, 1)).await;
    let body: serde_json::Value = serde_json::from_slice(&decoded.body).unwrap();
    assert_eq!(body["id"], "café");

    assert_eq!(observe(case(&client, native, 4)).await.status, 413);
    assert_eq!(observe(case(&client, native, 5)).await.status, 405);
    assert_eq!(observe(case(&client, fallback, 8)).await.status, 500);

    shutdown.trigger();
}

#[tokio::test]
async fn fallback_serves_concurrent_connections() {
    let shutdown = Shutdown::new();
    let addr = start(EngineKind::Fallback, &shutdown).await;
    let client = common::client();

    let requests = (0..32).map(|i| {
        let client = client.clone();
        async move {
            client
                .get(format!("http://{addr}/items/{i}"))
                .send()
                .await
                .unwrap()
                .status()
        }
    });
    let statuses = futures_util::future::join_all(requests).await;
    assert!(statuses.iter().all(|s| *s == 200));

    shutdown.trigger();
}
