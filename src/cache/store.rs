//! TTL response store.
//!
//! # Responsibilities
//! - Decide cache eligibility and derive keys (`plan`)
//! - Serve unexpired entries, store 2xx responses under the rule's TTL
//! - Purge expired entries at lookup and from a periodic sweep
//!
//! # Design Decisions
//! - Entries live in a `DashMap`; a lookup/store race on one key may cause
//!   a duplicate backend call but never serves expired content
//! - Entries hold `Arc<CachedResponse>`, so a hit does not copy the body

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cache::rules::CacheRules;
use crate::config::{CacheRuleConfig, QueryPolicy};
use crate::error::StartupError;
use crate::http::QueryParams;

/// Header reporting whether a response came from the cache.
pub const X_CACHE: &str = "x-cache";

/// A fully buffered backend response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    /// Build a response carrying `x-cache: HIT` or `MISS`.
    pub fn to_response(&self, hit: bool) -> axum::response::Response {
        let mut response = axum::response::Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response.headers_mut().insert(
            X_CACHE,
            HeaderValue::from_static(if hit { "HIT" } else { "MISS" }),
        );
        response
    }
}

#[derive(Debug)]
struct CacheEntry {
    response: Arc<CachedResponse>,
    expires_at: Instant,
}

/// Key and TTL for an eligible request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePlan {
    pub key: String,
    pub ttl: Duration,
}

/// In-memory response cache.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    rules: CacheRules,
    query_policy: QueryPolicy,
}

impl ResponseCache {
    pub fn new(rules: CacheRules, query_policy: QueryPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            rules,
            query_policy,
        }
    }

    pub fn from_config(
        rules: &[CacheRuleConfig],
        query_policy: QueryPolicy,
    ) -> Result<Self, StartupError> {
        Ok(Self::new(CacheRules::compile(rules)?, query_policy))
    }

    /// TTL of the first rule matching `path`.
    pub fn rule_for(&self, path: &str) -> Option<Duration> {
        self.rules.rule_for(path).map(|rule| rule.ttl())
    }

    pub fn rules(&self) -> &CacheRules {
        &self.rules
    }

    /// Cache key: method, path and (per policy) the sorted query.
    pub fn key_for(&self, method: &Method, uri: &Uri) -> String {
        let mut key = format!("{} {}", method, uri.path());
        if self.query_policy == QueryPolicy::Include {
            if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
                key.push('?');
                key.push_str(&QueryParams::parse(query).canonical());
            }
        }
        key
    }

    /// `Some` when the request may be served from / stored into the cache.
    pub fn plan(&self, method: &Method, uri: &Uri) -> Option<CachePlan> {
        if method != Method::GET && method != Method::HEAD {
            return None;
        }
        let ttl = self.rule_for(uri.path())?;
        Some(CachePlan {
            key: self.key_for(method, uri),
            ttl,
        })
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<CachedResponse>> {
        self.lookup_at(key, Instant::now())
    }

    pub fn lookup_at(&self, key: &str, now: Instant) -> Option<Arc<CachedResponse>> {
        {
            let entry = self.entries.get(key)?;
            if entry.expires_at > now {
                return Some(Arc::clone(&entry.response));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Store a response. Non-2xx responses and zero TTLs are ignored.
    pub fn store(&self, key: impl Into<String>, response: CachedResponse, ttl: Duration) -> bool {
        self.store_at(key, response, ttl, Instant::now())
    }

    pub fn store_at(
        &self,
        key: impl Into<String>,
        response: CachedResponse,
        ttl: Duration,
        now: Instant,
    ) -> bool {
        if !response.status.is_success() || ttl.is_zero() {
            return false;
        }
        self.entries.insert(
            key.into(),
            CacheEntry {
                response: Arc::new(response),
                expires_at: now + ttl,
            },
        );
        true
    }

    /// Discard everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Entry count, expired entries included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Run `purge_expired` every `interval` until shutdown.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = cache.purge_expired(Instant::now());
                        if purged > 0 {
                            tracing::debug!(purged, remaining = cache.len(), "Purged expired cache entries");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}
