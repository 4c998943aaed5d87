//! CORS middleware.
//!
//! Answers preflight requests itself and decorates every other response
//! (including error responses from inner layers) with the allow headers.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};

use crate::error::ApiResult;
use crate::http::{Middleware, Next, Request, Response};

/// CORS policy.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins (`*` for any).
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    /// Allowed request headers (`*` echoes the requested ones).
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age: Option<u32>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_headers: vec!["*".to_string()],
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age: Some(86400),
        }
    }
}

impl CorsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn expose<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exposed_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = Some(seconds);
        self
    }

    fn any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.any_origin() || self.allowed_origins.iter().any(|o| o == origin)
    }
}

/// CORS middleware.
#[derive(Debug, Clone, Default)]
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    /// Allow everything.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Value for `Access-Control-Allow-Origin`, or `None` when the origin is refused.
    fn allow_origin(&self, origin: Option<&str>) -> Option<String> {
        match origin {
            // Credentials forbid the wildcard, so echo the concrete origin.
            Some(origin) if self.config.is_origin_allowed(origin) => {
                if self.config.any_origin() && !self.config.allow_credentials {
                    Some("*".to_string())
                } else {
                    Some(origin.to_string())
                }
            }
            Some(_) => None,
            None if self.config.any_origin() => Some("*".to_string()),
            None => None,
        }
    }

    fn decorate(&self, response: &mut Response, allow_origin: &str) {
        response.set_header("access-control-allow-origin", allow_origin);
        if allow_origin != "*" {
            response.set_header("vary", "Origin");
        }
        if self.config.allow_credentials {
            response.set_header("access-control-allow-credentials", "true");
        }
        if !self.config.exposed_headers.is_empty() {
            response.set_header(
                "access-control-expose-headers",
                &self.config.exposed_headers.join(", "),
            );
        }
    }

    fn preflight(&self, req: &Request, allow_origin: &str) -> Response {
        let mut response = Response::empty(StatusCode::NO_CONTENT);
        self.decorate(&mut response, allow_origin);
        response.set_header(
            "access-control-allow-methods",
            &self.config.allowed_methods.join(", "),
        );
        let headers = if self.config.allowed_headers.iter().any(|h| h == "*") {
            req.header("access-control-request-headers")
                .unwrap_or("*")
                .to_string()
        } else {
            self.config.allowed_headers.join(", ")
        };
        response.set_header("access-control-allow-headers", &headers);
        if let Some(max_age) = self.config.max_age {
            response.set_header("access-control-max-age", &max_age.to_string());
        }
        response
    }
}

#[async_trait]
impl Middleware for CorsMiddleware {
    async fn handle(&self, req: Request, next: Next<'_>) -> ApiResult<Response> {
        let allow_origin = self.allow_origin(req.header("origin"));

        let is_preflight = req.method() == Method::OPTIONS
            && req.header("access-control-request-method").is_some();
        if is_preflight {
            return Ok(match allow_origin {
                Some(origin) => self.preflight(&req, &origin),
                None => Response::empty(StatusCode::FORBIDDEN),
            });
        }

        let mut response = match next.run(req).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        };
        if let Some(origin) = allow_origin {
            self.decorate(&mut response, &origin);
        }
        Ok(response)
    }
}
