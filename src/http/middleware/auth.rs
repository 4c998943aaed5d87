//! Bearer-token authentication middleware.
//!
//! Token checking is delegated to a [`TokenVerifier`]; the verified subject
//! is attached to the request extensions as [`AuthSubject`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header;

use crate::error::{ApiError, ApiResult};
use crate::http::{Middleware, Next, Request, Response};

/// Identity of an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSubject(pub String);

/// Resolves a bearer token to a subject.
#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    async fn verify(&self, token: &str) -> Option<String>;
}

/// Fixed token → subject table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, subject: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), subject.into());
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokens {
    async fn verify(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// Rejects requests without a valid `Authorization: Bearer <token>` header.
#[derive(Clone)]
pub struct BearerAuth {
    verifier: Arc<dyn TokenVerifier>,
}

impl BearerAuth {
    pub fn new(verifier: impl TokenVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.header(header::AUTHORIZATION.as_str())?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[async_trait]
impl Middleware for BearerAuth {
    async fn handle(&self, mut req: Request, next: Next<'_>) -> ApiResult<Response> {
        let Some(token) = bearer_token(&req) else {
            tracing::debug!(path = %req.path(), "Missing bearer token");
            return Err(ApiError::Unauthorized);
        };

        let subject = match self.verifier.verify(token).await {
            Some(subject) => subject,
            None => {
                tracing::debug!(path = %req.path(), "Rejected bearer token");
                return Err(ApiError::Unauthorized);
            }
        };

        req.extensions_mut().insert(AuthSubject(subject));
        next.run(req).await
    }
}
