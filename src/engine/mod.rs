//! Execution engines.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     --engine flag, else config preference → EDGEWAY_ENGINE override
//!     → platform availability
//!     → EngineKind (fixed for the process lifetime)
//!     → EngineKind::runtime() (multi-thread | current-thread)
//!     → select_engine() → Box<dyn Engine>
//!
//! Serving:
//!     Engine::serve(app, listener, shutdown)
//!         native:   accept → tokio::spawn(serve_connection) per connection
//!         fallback: accept + every connection polled from one loop
//!     serve_connection → hyper http1 → App::dispatch
//! ```
//!
//! # Design Decisions
//! - Both engines share `serve_connection`, so wire behavior cannot diverge
//! - The choice is made once; nothing branches on the engine per request

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::error::StartupError;
use crate::http::App;

#[cfg(feature = "fallback-engine")]
pub mod fallback;
#[cfg(all(unix, feature = "native-engine"))]
pub mod native;

/// Environment variable overriding the configured preference.
pub const ENGINE_ENV_VAR: &str = "EDGEWAY_ENGINE";

/// A concrete engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Multi-threaded, task per connection.
    Native,
    /// Single cooperative loop on a current-thread runtime.
    Fallback,
}

/// What the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnginePreference {
    Native,
    Fallback,
    #[default]
    Auto,
}

impl FromStr for EnginePreference {
    type Err = StartupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "fallback" => Ok(Self::Fallback),
            "auto" | "" => Ok(Self::Auto),
            _ => Err(StartupError::UnknownEngine(s.to_string())),
        }
    }
}

impl EnginePreference {
    /// Apply the `EDGEWAY_ENGINE` override, if set.
    pub fn with_env_override(self) -> Result<Self, StartupError> {
        self.with_override(std::env::var(ENGINE_ENV_VAR).ok().as_deref())
    }

    fn with_override(self, value: Option<&str>) -> Result<Self, StartupError> {
        match value {
            Some(value) => value.parse(),
            None => Ok(self),
        }
    }

    /// Effective preference: an explicit command-line choice, else the
    /// configured one with the `EDGEWAY_ENGINE` override applied.
    pub fn effective(cli: Option<Self>, configured: Self) -> Result<Self, StartupError> {
        match cli {
            Some(preference) => Ok(preference),
            None => configured.with_env_override(),
        }
    }
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Native => "native",
            EngineKind::Fallback => "fallback",
        }
    }

    /// Whether this build can run the engine.
    pub fn is_available(self) -> bool {
        match self {
            EngineKind::Native => cfg!(all(unix, feature = "native-engine")),
            EngineKind::Fallback => cfg!(feature = "fallback-engine"),
        }
    }

    /// Pick the engine for `preference`.
    ///
    /// An unavailable explicit choice degrades to the other engine with a warning.
    pub fn resolve(preference: EnginePreference) -> Result<Self, StartupError> {
        Self::resolve_with(preference, Self::is_available)
    }

    fn resolve_with(
        preference: EnginePreference,
        available: impl Fn(EngineKind) -> bool,
    ) -> Result<Self, StartupError> {
        let order = match preference {
            EnginePreference::Native | EnginePreference::Auto => [EngineKind::Native, EngineKind::Fallback],
            EnginePreference::Fallback => [EngineKind::Fallback, EngineKind::Native],
        };

        let kind = order
            .into_iter()
            .find(|kind| available(*kind))
            .ok_or(StartupError::NoEngineAvailable)?;

        if preference != EnginePreference::Auto && kind != order[0] {
            tracing::warn!(
                requested = order[0].as_str(),
                selected = kind.as_str(),
                "Requested engine unavailable, falling back"
            );
        }
        Ok(kind)
    }

    /// Build the Tokio runtime this engine runs on.
    pub fn runtime(self) -> Result<tokio::runtime::Runtime, StartupError> {
        let mut builder = match self {
            EngineKind::Native => tokio::runtime::Builder::new_multi_thread(),
            EngineKind::Fallback => tokio::runtime::Builder::new_current_thread(),
        };
        builder
            .enable_all()
            .thread_name("edgeway-worker")
            .build()
            .map_err(StartupError::Runtime)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serves an [`App`] on a listener until shutdown.
#[async_trait]
pub trait Engine: Send + Sync {
    fn kind(&self) -> EngineKind;

    async fn serve(
        &self,
        app: Arc<App>,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()>;
}

/// Construct the engine for `kind`.
pub fn engine_for(kind: EngineKind) -> Result<Box<dyn Engine>, StartupError> {
    match kind {
        #[cfg(all(unix, feature = "native-engine"))]
        EngineKind::Native => Ok(Box::new(native::NativeEngine::new())),
        #[cfg(feature = "fallback-engine")]
        EngineKind::Fallback => Ok(Box::new(fallback::FallbackEngine::new())),
        #[allow(unreachable_patterns)]
        _ => Err(StartupError::NoEngineAvailable),
    }
}

/// Resolve `preference` (with env override) and construct the engine.
pub fn select_engine(preference: EnginePreference) -> Result<Box<dyn Engine>, StartupError> {
    let preference = preference.with_env_override()?;
    let kind = EngineKind::resolve(preference)?;
    tracing::info!(engine = %kind, preference = ?preference, "Execution engine selected");
    engine_for(kind)
}

/// Drive one HTTP/1.1 connection to completion, or until shutdown.
pub(crate) async fn serve_connection(
    app: Arc<App>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) {
    let service = service_fn(move |req: hyper::Request<Incoming>| {
        let app = app.clone();
        async move { Ok::<_, Infallible>(app.dispatch(req.map(Body::new), Some(peer)).await) }
    });

    let conn = hyper::server::conn::http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };

    if let Err(err) = result {
        tracing::debug!(peer = %peer, error = %err, "Connection closed with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_parsing() {
        assert_eq!("Native".parse::<EnginePreference>().unwrap(), EnginePreference::Native);
        assert_eq!(" fallback ".parse::<EnginePreference>().unwrap(), EnginePreference::Fallback);
        assert_eq!("auto".parse::<EnginePreference>().unwrap(), EnginePreference::Auto);
        assert!(matches!(
            "turbo".parse::<EnginePreference>(),
            Err(StartupError::UnknownEngine(_))
        ));
    }

    #[test]
    fn env_value_overrides_configured_preference() {
        let overridden = EnginePreference::Native.with_override(Some("fallback")).unwrap();
        assert_eq!(overridden, EnginePreference::Fallback);
        assert_eq!(
            EnginePreference::Native.with_override(None).unwrap(),
            EnginePreference::Native
        );
        assert!(EnginePreference::Auto.with_override(Some("turbo")).is_err());
    }

    #[test]
    fn command_line_choice_wins() {
        let preference =
            EnginePreference::effective(Some(EnginePreference::Native), EnginePreference::Fallback)
                .unwrap();
        assert_eq!(preference, EnginePreference::Native);
    }

    #[test]
    fn auto_prefers_native() {
        let kind = EngineKind::resolve_with(EnginePreference::Auto, |_| true).unwrap();
        assert_eq!(kind, EngineKind::Native);
    }

    #[test]
    fn explicit_choice_is_honored() {
        let kind = EngineKind::resolve_with(EnginePreference::Fallback, |_| true).unwrap();
        assert_eq!(kind, EngineKind::Fallback);
    }

    #[test]
    fn unavailable_choice_degrades() {
        let kind = EngineKind::resolve_with(EnginePreference::Native, |k| k == EngineKind::Fallback)
            .unwrap();
        assert_eq!(kind, EngineKind::Fallback);
    }

    #[test]
    fn nothing_available_is_fatal() {
        assert!(matches!(
            EngineKind::resolve_with(EnginePreference::Auto, |_| false),
            Err(StartupError::NoEngineAvailable)
        ));
    }

    #[test]
    fn runtimes_build() {
        for kind in [EngineKind::Native, EngineKind::Fallback] {
            let runtime = kind.runtime().unwrap();
            assert_eq!(runtime.block_on(async { 1 + 1 }), 2);
        }
    }
}
