//! Per-client token bucket rate limiting.
//!
//! # Design Decisions
//! - Buckets live in a sharded `DashMap`; one bucket is updated under its entry lock
//! - Refill is a pure function of elapsed time, so no timer per bucket
//! - Zero tokens is an immediate rejection, never a queue
//! - Idle buckets are swept periodically, but only once they would have refilled
//!   to `burst`, so a returning client never gets more than the refill rate allows

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::RateLimitConfig;

/// A simple token bucket.
#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token buckets keyed by client.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    rate: f64,
    burst: f64,
    idle_eviction: Duration,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64, burst: u32, idle_eviction: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            rate: requests_per_second,
            burst: f64::from(burst.max(1)),
            idle_eviction,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.requests_per_second,
            config.burst,
            Duration::from_secs(config.idle_eviction_secs),
        )
    }

    /// Consume one token for `key`. `false` means rejected.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return bucket.try_acquire(now, self.burst, self.rate);
        }
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst, now))
            .try_acquire(now, self.burst, self.rate)
    }

    /// Tokens currently held by `key` (without refilling).
    pub fn tokens(&self, key: &str) -> Option<f64> {
        self.buckets.get(key).map(|b| b.tokens)
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop buckets idle for longer than the eviction window that have also
    /// refilled to `burst` by `now`.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        let idle = self.idle_eviction;
        self.buckets.retain(|_, bucket| {
            let elapsed = now.saturating_duration_since(bucket.last_refill);
            let refilled = bucket.tokens + elapsed.as_secs_f64() * self.rate >= self.burst;
            elapsed < idle || !refilled
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Run `evict_idle` periodically until shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = (limiter.idle_eviction / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_idle(Instant::now());
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = limiter.len(), "Evicted idle rate-limit buckets");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

/// Derive the client key: the configured header's first value, else the peer IP.
pub fn client_key(headers: &HeaderMap, peer: IpAddr, key_header: Option<&str>) -> String {
    key_header
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn burst_then_reject_then_refill() {
        let limiter = RateLimiter::new(10.0, 10, Duration::from_secs(60));
        let start = Instant::now();

        for i in 0..10 {
            assert!(limiter.check_at("client", start), "request {i} should pass");
        }
        assert!(!limiter.check_at("client", start));

        let later = start + Duration::from_secs(1);
        assert!(limiter.check_at("client", later));
    }

    #[test]
    fn tokens_never_exceed_burst() {
        let limiter = RateLimiter::new(100.0, 5, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("c", start));
        assert!(limiter.check_at("c", start + Duration::from_secs(3600)));
        assert!(limiter.tokens("c").unwrap() <= 5.0);
    }

    #[test]
    fn clients_are_independent() {
        let limiter = RateLimiter::new(1.0, 1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("a", now));
        assert!(!limiter.check_at("a", now));
        assert!(limiter.check_at("b", now));
    }

    #[test]
    fn idle_buckets_are_evicted() {
        let limiter = RateLimiter::new(1.0, 1, Duration::from_secs(10));
        let now = Instant::now();
        limiter.check_at("old", now);
        limiter.check_at("fresh", now + Duration::from_secs(9));

        assert_eq!(limiter.evict_idle(now + Duration::from_secs(11)), 1);
        assert!(limiter.tokens("old").is_none());
        assert!(limiter.tokens("fresh").is_some());
    }

    #[test]
    fn eviction_never_outpaces_refill() {
        let limiter = RateLimiter::new(1.0, 100, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..100 {
            assert!(limiter.check_at("client", start));
        }

        let later = start + Duration::from_secs(61);
        assert_eq!(limiter.evict_idle(later), 0);
        let granted = (0..200).filter(|_| limiter.check_at("client", later)).count();
        assert_eq!(granted, 61);

        // Full again after another 100s; dropping the bucket changes nothing.
        let refilled = later + Duration::from_secs(100);
        assert_eq!(limiter.evict_idle(refilled), 1);
        assert!(limiter.tokens("client").is_none());
    }

    #[test]
    fn key_from_header_or_peer() {
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, peer, Some("x-forwarded-for")), "10.0.0.1");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.2"));
        assert_eq!(client_key(&headers, peer, Some("x-forwarded-for")), "203.0.113.9");
        assert_eq!(client_key(&headers, peer, None), "10.0.0.1");
    }
}
