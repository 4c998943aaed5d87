//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every configured accelerator (fail fast on bad config)
//! - Bind all listeners before any of them starts serving
//! - Track the serving tasks so shutdown can wait for them
//!
//! # Design Decisions
//! - Any startup error is fatal and nothing is left running
//! - Draining is bounded by `timeouts.shutdown_grace_secs`

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::cache::CacheServer;
use crate::config::EdgewayConfig;
use crate::error::StartupError;
use crate::gateway::GatewayServer;
use crate::lifecycle::Shutdown;
use crate::stream::{StreamHandle, StreamServer};

/// Bind a TCP listener on `host:port`.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, StartupError> {
    let addr = format!("{host}:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })
}

/// Handles to the running accelerators.
#[derive(Debug, Default)]
pub struct Accelerators {
    tasks: Vec<(&'static str, JoinHandle<std::io::Result<()>>)>,
    addresses: Vec<(&'static str, SocketAddr)>,
    stream: Option<StreamHandle>,
}

impl Accelerators {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Local address of the named accelerator (`gateway`, `cache`, `stream`).
    pub fn address(&self, name: &str) -> Option<SocketAddr> {
        self.addresses
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, addr)| *addr)
    }

    pub fn stream_handle(&self) -> Option<StreamHandle> {
        self.stream.clone()
    }

    fn spawn<F>(&mut self, name: &'static str, addr: SocketAddr, server: F)
    where
        F: std::future::Future<Output = std::io::Result<()>> + Send + 'static,
    {
        self.addresses.push((name, addr));
        self.tasks.push((name, tokio::spawn(server)));
    }

    /// Wait for every accelerator to stop, at most `grace`.
    pub async fn join(self, grace: Duration) {
        let drain = async {
            for (name, task) in self.tasks {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => tracing::error!(accelerator = name, error = %err, "Accelerator failed"),
                    Err(err) => tracing::error!(accelerator = name, error = %err, "Accelerator task panicked"),
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!(grace = ?grace, "Shutdown grace period elapsed, abandoning open connections");
        }
    }
}

/// Build, bind and start every accelerator present in `config`.
pub async fn start_accelerators(
    config: &EdgewayConfig,
    shutdown: &Shutdown,
) -> Result<Accelerators, StartupError> {
    let gateway = match &config.gateway {
        Some(gateway) => {
            let server = GatewayServer::new(gateway, &config.timeouts, &config.retries)?;
            Some((server, bind(&gateway.host, gateway.port).await?))
        }
        None => None,
    };
    let cache = match &config.cache {
        Some(cache) => {
            let server = CacheServer::new(cache, &config.timeouts, &config.retries)?;
            Some((server, bind(&cache.host, cache.port).await?))
        }
        None => None,
    };
    let stream = match &config.stream {
        Some(stream) => Some((StreamServer::new(stream), bind(&stream.host, stream.port).await?)),
        None => None,
    };

    let mut accelerators = Accelerators::default();
    if let Some((server, listener)) = gateway {
        let addr = local_addr(&listener)?;
        accelerators.spawn("gateway", addr, server.run(listener, shutdown.subscribe()));
    }
    if let Some((server, listener)) = cache {
        let addr = local_addr(&listener)?;
        accelerators.spawn("cache", addr, server.run(listener, shutdown.subscribe()));
    }
    if let Some((server, listener)) = stream {
        let addr = local_addr(&listener)?;
        accelerators.stream = Some(server.handle());
        accelerators.spawn("stream", addr, server.run(listener, shutdown.subscribe()));
    }
    Ok(accelerators)
}

fn local_addr(listener: &TcpListener) -> Result<SocketAddr, StartupError> {
    listener.local_addr().map_err(|source| StartupError::Bind {
        addr: "listener".to_string(),
        source,
    })
}
