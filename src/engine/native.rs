//! Native engine: multi-threaded runtime, one task per connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::engine::{serve_connection, Engine, EngineKind};
use crate::http::App;

/// Pause after an accept error (e.g. fd exhaustion) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Engine for NativeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Native
    }

    async fn serve(
        &self,
        app: Arc<App>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, engine = "native", "Engine listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            tracing::debug!(peer = %peer, error = %err, "Failed to set TCP_NODELAY");
                        }
                        tokio::spawn(serve_connection(
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
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!(address = %addr, engine = "native", "Engine stopped accepting");
        Ok(())
    }
}
