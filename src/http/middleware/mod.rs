//! Middleware chain.
//!
//! # Data Flow
//! ```text
//! Build time:
//!     [cors, auth, ...] + handler → Endpoint::compose (once per route)
//!
//! Per request:
//!     Endpoint::respond
//!         → cors.handle(req, next)
//!             → auth.handle(req, next)
//!                 → handler.call(req)
//!         ← Err(ApiError) / panic converted to a JSON error response here
//! ```
//!
//! # Design Decisions
//! - First-registered middleware is outermost; no reordering
//! - A middleware short-circuits by returning without calling `next.run`
//! - `Next` borrows the composed chain, so a request never re-composes it

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::{ApiError, ApiResult};
use crate::http::{Handler, Request, Response};

pub mod auth;
pub mod cors;

pub use auth::{AuthSubject, BearerAuth, StaticTokens, TokenVerifier};
pub use cors::{CorsConfig, CorsMiddleware};

/// A layer around the handler.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, req: Request, next: Next<'_>) -> ApiResult<Response>;
}

/// The remainder of the chain, as seen by one middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Invoke the next layer.
    pub fn run(self, req: Request) -> BoxFuture<'a, ApiResult<Response>> {
        match self.rest.split_first() {
            Some((layer, rest)) => layer.handle(
                req,
                Next {
                    rest,
                    handler: self.handler,
                },
            ),
            None => self.handler.call(req),
        }
    }
}

/// A handler with its middleware chain, composed once.
#[derive(Clone)]
pub struct Endpoint {
    middleware: Arc<[Arc<dyn Middleware>]>,
    handler: Arc<dyn Handler>,
}

impl Endpoint {
    pub fn compose(middleware: &[Arc<dyn Middleware>], handler: Arc<dyn Handler>) -> Self {
        Self {
            middleware: Arc::from(middleware),
            handler,
        }
    }

    /// Number of middleware layers around the handler.
    pub fn depth(&self) -> usize {
        self.middleware.len()
    }

    /// Run the chain and surface errors to the caller.
    pub async fn call(&self, req: Request) -> ApiResult<Response> {
        Next {
            rest: &self.middleware,
            handler: self.handler.as_ref(),
        }
        .run(req)
        .await
    }

    /// Run the chain as the outermost boundary: every outcome becomes a response.
    pub async fn respond(&self, req: Request) -> Response {
        let method = req.method().clone();
        let path = req.path().to_string();

        match AssertUnwindSafe(self.call(req)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                if err.status_code().is_server_error() {
                    tracing::error!(method = %method, path = %path, error = %err, "Handler failed");
                } else {
                    tracing::debug!(method = %method, path = %path, error = %err, "Request rejected");
                }
                err.into_response()
            }
            Err(_) => {
                tracing::error!(method = %method, path = %path, "Handler panicked");
                ApiError::handler("panic").into_response()
            }
        }
    }
}

#[async_trait]
impl Handler for Endpoint {
    async fn call(&self, req: Request) -> ApiResult<Response> {
        Endpoint::call(self, req).await
    }
}
