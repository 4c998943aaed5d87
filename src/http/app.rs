//! Application assembly: route table + middleware chain.
//!
//! # Responsibilities
//! - Collect routes and middleware through `AppBuilder`
//! - Compose one `Endpoint` per route at build time
//! - Dispatch transport requests (shared by both engines)
//!
//! # Design Decisions
//! - Routing errors are answered here and never reach middleware
//! - Exception: `OPTIONS` on a path with other methods runs the chain around
//!   an automatic `204` endpoint, so CORS preflight works without a route

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Method, StatusCode};

use crate::error::{ApiError, ApiResult, StartupError};
use crate::http::middleware::{Endpoint, Middleware};
use crate::http::request::DEFAULT_BODY_LIMIT;
use crate::http::{Handler, Request, Response};
use crate::routing::Router;

/// Methods allowed on the matched path, for the automatic `OPTIONS` endpoint.
#[derive(Debug, Clone)]
pub struct AllowedMethods(pub Vec<Method>);

struct AutoOptions;

#[async_trait]
impl Handler for AutoOptions {
    async fn call(&self, req: Request) -> ApiResult<Response> {
        let mut response = Response::empty(StatusCode::NO_CONTENT);
        if let Some(AllowedMethods(methods)) = req.extensions().get::<AllowedMethods>() {
            let allow = methods
                .iter()
                .chain(std::iter::once(&Method::OPTIONS))
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }
        Ok(response)
    }
}

/// Collects routes and middleware.
pub struct AppBuilder {
    middleware: Vec<Arc<dyn Middleware>>,
    routes: Vec<(Method, String, Arc<dyn Handler>)>,
    body_limit: usize,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self {
            middleware: Vec::new(),
            routes: Vec::new(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware. The first one added is the outermost.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn route(mut self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        self.routes
            .push((method, pattern.to_string(), Arc::new(handler)));
        self
    }

    pub fn get(self, pattern: &str, handler: impl Handler) -> Self {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: impl Handler) -> Self {
        self.route(Method::POST, pattern, handler)
    }

    pub fn put(self, pattern: &str, handler: impl Handler) -> Self {
        self.route(Method::PUT, pattern, handler)
    }

    pub fn patch(self, pattern: &str, handler: impl Handler) -> Self {
        self.route(Method::PATCH, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: impl Handler) -> Self {
        self.route(Method::DELETE, pattern, handler)
    }

    /// Maximum request body size in bytes.
    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Validate patterns, reject duplicates and compose every endpoint.
    pub fn build(self) -> Result<App, StartupError> {
        let mut router = Router::builder();
        for (method, pattern, handler) in self.routes {
            router.route(method, &pattern, Endpoint::compose(&self.middleware, handler))?;
        }
        let router = router.build()?;
        let auto_options = Endpoint::compose(&self.middleware, Arc::new(AutoOptions));

        tracing::info!(
            routes = router.len(),
            middleware = self.middleware.len(),
            "Application built"
        );

        Ok(App {
            router,
            auto_options,
            body_limit: self.body_limit,
        })
    }
}

/// A built application, shared by the engine across connections.
pub struct App {
    router: Router<Endpoint>,
    auto_options: Endpoint,
    body_limit: usize,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    pub fn route_count(&self) -> usize {
        self.router.len()
    }

    /// Route a request through the matched endpoint.
    pub async fn handle(&self, mut req: Request) -> Response {
        let method = req.method().clone();
        let path = req.path().to_string();

        match self.router.match_route(&method, &path) {
            Ok(matched) => {
                req.set_path_params(matched.params);
                matched.value.respond(req).await
            }
            Err(ApiError::MethodNotAllowed { allowed, .. }) if method == Method::OPTIONS => {
                req.extensions_mut().insert(AllowedMethods(allowed));
                self.auto_options.respond(req).await
            }
            Err(err) => {
                tracing::debug!(method = %method, path = %path, error = %err, "Routing failed");
                err.into_response()
            }
        }
    }

    /// Entry point for the engines.
    pub async fn dispatch(
        &self,
        req: axum::http::Request<Body>,
        remote_addr: Option<SocketAddr>,
    ) -> axum::response::Response {
        let started = Instant::now();
        let request = Request::from_http(req, remote_addr, self.body_limit);
        let method = request.method().clone();
        let path = request.path().to_string();

        let response = self.handle(request).await;

        tracing::debug!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Request completed"
        );
        response.into_http()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler_fn;

    fn named(name: &'static str) -> impl Handler {
        handler_fn(move |req: Request| async move {
            let id = req.path_param("id").unwrap_or("-").to_string();
            Ok(Response::text(StatusCode::OK, format!("{name}:{id}")))
        })
    }

    fn app() -> App {
        App::builder()
            .get("/users/me", named("me"))
            .get("/users/{id}", named("user"))
            .post("/users", named("create"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn routes_with_params() {
        let app = app();
        let response = app.handle(Request::new(Method::GET, "/users/42")).await;
        assert_eq!(response.body().as_ref(), b"user:42");
        let response = app.handle(Request::new(Method::GET, "/users/me")).await;
        assert_eq!(response.body().as_ref(), b"me:-");
    }

    #[tokio::test]
    async fn routing_errors() {
        let app = app();
        let response = app.handle(Request::new(Method::GET, "/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.handle(Request::new(Method::DELETE, "/users")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.header("allow"), Some("POST"));
    }

    #[tokio::test]
    async fn options_without_route_lists_methods() {
        let response = app().handle(Request::new(Method::OPTIONS, "/users")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.header("allow"), Some("POST, OPTIONS"));
    }

    #[test]
    fn duplicate_routes_fail_build() {
        let result = App::builder()
            .get("/items/{id}", named("a"))
            .get("/items/{item}", named("b"))
            .build();
        assert!(matches!(result, Err(StartupError::DuplicateRoute { .. })));
    }
}
