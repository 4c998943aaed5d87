//! Retry logic.
//!
//! # Responsibilities
//! - Determine if request is retryable (idempotent methods only)
//! - Compute exponential backoff + jitter between attempts
//!
//! # Design Decisions
//! - Off by default: one attempt, backend failure is an immediate 502
//! - Never retry POST/PATCH (non-idempotent)
//! - Only connection errors are retried; a backend 5xx is relayed as-is
//! - Jittered backoff prevents thundering herd

use std::time::Duration;

use axum::http::Method;
use rand::Rng;

use crate::config::RetryConfig;

/// How many times, and how patiently, to retry a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Attempts allowed for `method`.
    pub fn attempts_for(&self, method: &Method) -> u32 {
        if is_idempotent(method) {
            self.max_attempts
        } else {
            1
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` have failed.
    ///
    /// `base_delay * 2^(attempt - 1)` capped at `max_delay`, plus up to a
    /// tenth of that as jitter. Zero before the first attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let Some(doublings) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let delay = self
            .base_delay
            .checked_mul(2u32.saturating_pow(doublings))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay));

        let spread = delay / 10;
        if spread.is_zero() {
            return delay;
        }
        delay + rand::thread_rng().gen_range(Duration::ZERO..spread)
    }
}

/// GET, HEAD, OPTIONS, PUT, DELETE and TRACE.
pub fn is_idempotent(method: &Method) -> bool {
    method.is_idempotent()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts_for(&Method::GET), 1);
    }

    #[test]
    fn only_idempotent_methods_retry() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        });
        assert_eq!(policy.attempts_for(&Method::GET), 3);
        assert_eq!(policy.attempts_for(&Method::PUT), 3);
        assert_eq!(policy.attempts_for(&Method::POST), 1);
        assert_eq!(policy.attempts_for(&Method::PATCH), 1);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        });
        assert_eq!(policy.backoff(0), Duration::ZERO);

        let first = policy.backoff(1).as_millis();
        assert!((100..110).contains(&first), "first backoff {first}ms");

        let second = policy.backoff(2).as_millis();
        assert!((200..220).contains(&second), "second backoff {second}ms");

        for attempt in [5, 10, 64] {
            let capped = policy.backoff(attempt).as_millis();
            assert!((1000..1100).contains(&capped), "attempt {attempt}: {capped}ms");
        }
    }
}
