//! WebSocket and SSE endpoints.
//!
//! `/ws` upgrades to a WebSocket: outbound messages from the registry are
//! sent as text frames, client frames are published to inbound subscribers.
//! `/sse` opens an event stream that starts with a `connected` event carrying
//! the connection id. Both refuse with 503 before upgrading when full.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{ConnectInfo, State},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{stream, SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::trace::TraceLayer;

use crate::config::StreamConfig;
use crate::error::ApiError;
use crate::stream::registry::{
    ConnectionGuard, ConnectionKind, ConnectionRegistry, Payload, StreamHandle,
};

/// Stream accelerator.
pub struct StreamServer {
    registry: Arc<ConnectionRegistry>,
}

impl StreamServer {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(config.max_connections, config.channel_capacity),
        }
    }

    /// Application handle; stays valid after `run` consumes the server.
    pub fn handle(&self) -> StreamHandle {
        StreamHandle::new(Arc::clone(&self.registry))
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/sse", get(sse_handler))
            .with_state(Arc::clone(&self.registry))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires, then close every open connection.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_connections = self.registry.max_connections(),
            "Stream server starting"
        );

        let registry = Arc::clone(&self.registry);
        let app = self
            .build_router()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                registry.close_all();
            })
            .await?;

        tracing::info!("Stream server stopped");
        Ok(())
    }
}

fn at_capacity(registry: &ConnectionRegistry, peer: SocketAddr) -> Response {
    tracing::warn!(
        peer = %peer,
        max_connections = registry.max_connections(),
        "Refusing stream connection at capacity"
    );
    IntoResponse::into_response(ApiError::AdmissionRejected)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<ConnectionRegistry>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let Some((guard, outbound)) = registry.try_register(ConnectionKind::WebSocket, peer) else {
        return at_capacity(&registry, peer);
    };
    ws.on_upgrade(move |socket| run_websocket(socket, registry, guard, outbound))
}

async fn run_websocket(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    guard: ConnectionGuard,
    mut outbound: mpsc::Receiver<String>,
) {
    let id = guard.id();
    let (mut sink, mut incoming) = socket.split();

    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    registry.publish_inbound(id, Payload::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    registry.publish_inbound(id, Payload::Binary(data));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(connection = %id, error = %err, "WebSocket receive failed");
                    break;
                }
            },
        }
    }

    drop(guard);
}

async fn sse_handler(
    State(registry): State<Arc<ConnectionRegistry>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let Some((guard, outbound)) = registry.try_register(ConnectionKind::Sse, peer) else {
        return at_capacity(&registry, peer);
    };

    let connected = Event::default()
        .event("connected")
        .data(guard.id().to_string());
    let messages = stream::unfold((guard, outbound), |(guard, mut outbound)| async move {
        let message = outbound.recv().await?;
        Some((Ok::<_, Infallible>(Event::default().data(message)), (guard, outbound)))
    });
    let events = stream::once(async move { Ok::<_, Infallible>(connected) }).chain(messages);

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}
