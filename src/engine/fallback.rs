//! Fallback engine: a single cooperative loop.
//!
//! Accepting and every open connection are polled from one task. Handlers
//! suspend at I/O (body reads, backend calls) without blocking the others,
//! but nothing runs in parallel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::engine::{serve_connection, Engine, EngineKind};
use crate::http::App;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Open connections are given this long to finish after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct FallbackEngine;

impl FallbackEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Engine for FallbackEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Fallback
    }

    async fn serve(
        &self,
        app: Arc<App>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, engine = "fallback", "Engine listening");

        let mut connections = FuturesUnordered::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.push(serve_connection(
                            app.clone(),
                            stream,
                            peer,
                            shutdown.resubscribe(),
                        ));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(()) = connections.next(), if !connections.is_empty() => {}
                _ = shutdown.recv() => break,
            }
        }

        let open = connections.len();
        tracing::info!(address = %addr, engine = "fallback", open, "Engine draining");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(engine = "fallback", "Drain timed out, dropping connections");
        }
        Ok(())
    }
}
