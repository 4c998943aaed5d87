//! Handler invocation contract.

use std::future::Future;

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::http::{Request, Response};

/// Application code that turns a request into a response.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, req: Request) -> ApiResult<Response>;
}

/// Adapter returned by [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Use an async closure as a handler.
///
/// ```ignore
/// let hello = handler_fn(|_req| async { Ok(Response::text(StatusCode::OK, "hi")) });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<Response>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<Response>> + Send + 'static,
{
    async fn call(&self, req: Request) -> ApiResult<Response> {
        (self.f)(req).await
    }
}
