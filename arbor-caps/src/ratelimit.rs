//! Token-bucket rate limiting
//!
//! One bucket per `(principal, resource)` pair, created lazily on first
//! use with the capability's `rate_limit` as capacity. The bucket refills
//! to capacity once per refill period. Stale buckets are swept after a
//! TTL of inactivity.

use arbor_identity::AgentId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Rate limiter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Seconds between full refills
    pub refill_period_seconds: u64,
    /// Seconds of inactivity before a bucket is sweepable
    pub bucket_ttl_seconds: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            refill_period_seconds: 60,
            bucket_ttl_seconds: 3600,
        }
    }
}

/// Outcome of a consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// A token was consumed
    Allowed {
        /// Tokens left in the period
        remaining: u32,
    },
    /// The bucket is empty for the rest of the period
    Limited {
        /// The bucket's capacity
        limit: u32,
    },
}

#[derive(Debug)]
struct Bucket {
    capacity: u32,
    tokens: u32,
    last_refill: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

impl Bucket {
    fn refill_if_due(&mut self, now: DateTime<Utc>, period: Duration) {
        if now.signed_duration_since(self.last_refill) >= period {
            self.tokens = self.capacity;
            self.last_refill = now;
        }
    }
}

/// Per-(principal, resource) token buckets.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<(AgentId, String), Bucket>>,
}

impl RateLimiter {
    /// Create a limiter with the given tuning.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically take one token, or report `Limited` without side effects.
    ///
    /// `limit` comes from the authorizing capability; if it changed since
    /// the bucket was created the bucket is resized in place.
    pub async fn consume(&self, principal: &AgentId, resource: &str, limit: u32) -> RateDecision {
        let now = Utc::now();
        let period = Duration::seconds(self.config.refill_period_seconds as i64);
        let mut buckets = self.buckets.lock().await;

        let bucket = buckets
            .entry((principal.clone(), resource.to_string()))
            .or_insert_with(|| Bucket {
                capacity: limit,
                tokens: limit,
                last_refill: now,
                last_used: now,
            });

        if bucket.capacity != limit {
            bucket.capacity = limit;
            bucket.tokens = bucket.tokens.min(limit);
        }
        bucket.refill_if_due(now, period);
        bucket.last_used = now;

        if bucket.tokens == 0 {
            RateDecision::Limited { limit }
        } else {
            bucket.tokens -= 1;
            RateDecision::Allowed {
                remaining: bucket.tokens,
            }
        }
    }

    /// Tokens left in the current period, without consuming.
    ///
    /// An untouched pair reports the full limit.
    pub async fn remaining(&self, principal: &AgentId, resource: &str, limit: u32) -> u32 {
        let now = Utc::now();
        let period = Duration::seconds(self.config.refill_period_seconds as i64);
        let mut buckets = self.buckets.lock().await;

        match buckets.get_mut(&(principal.clone(), resource.to_string())) {
            Some(bucket) => {
                bucket.refill_if_due(now, period);
                bucket.tokens.min(limit)
            }
            None => limit,
        }
    }

    /// Drop the bucket for a pair, restoring full capacity on next use.
    pub async fn reset(&self, principal: &AgentId, resource: &str) {
        self.buckets
            .lock()
            .await
            .remove(&(principal.clone(), resource.to_string()));
    }

    /// Drop buckets idle past the TTL; returns how many were removed.
    pub async fn sweep_stale(&self) -> usize {
        let horizon = Utc::now() - Duration::seconds(self.config.bucket_ttl_seconds as i64);
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, b| b.last_used > horizon);
        before - buckets.len()
    }

    /// Number of live buckets.
    pub async fn bucket_count(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> AgentId {
        AgentId::derive(&[1u8; 32])
    }

    #[tokio::test]
    async fn test_first_n_allowed_then_limited() {
        let limiter = RateLimiter::default();
        let p = principal();

        for i in (1..=3).rev() {
            assert_eq!(
                limiter.consume(&p, "arbor://fs/read/docs", 3).await,
                RateDecision::Allowed { remaining: i - 1 }
            );
        }
        assert_eq!(
            limiter.consume(&p, "arbor://fs/read/docs", 3).await,
            RateDecision::Limited { limit: 3 }
        );
    }

    #[tokio::test]
    async fn test_remaining_does_not_consume() {
        let limiter = RateLimiter::default();
        let p = principal();

        assert_eq!(limiter.remaining(&p, "r", 5).await, 5);
        limiter.consume(&p, "r", 5).await;
        assert_eq!(limiter.remaining(&p, "r", 5).await, 4);
        assert_eq!(limiter.remaining(&p, "r", 5).await, 4);
    }

    #[tokio::test]
    async fn test_buckets_are_independent() {
        let limiter = RateLimiter::default();
        let p = principal();
        let q = AgentId::derive(&[2u8; 32]);

        assert_eq!(
            limiter.consume(&p, "r", 1).await,
            RateDecision::Allowed { remaining: 0 }
        );
        assert_eq!(
            limiter.consume(&p, "r", 1).await,
            RateDecision::Limited { limit: 1 }
        );
        // Other principal and other resource are untouched
        assert_eq!(
            limiter.consume(&q, "r", 1).await,
            RateDecision::Allowed { remaining: 0 }
        );
        assert_eq!(
            limiter.consume(&p, "other", 1).await,
            RateDecision::Allowed { remaining: 0 }
        );
    }

    #[tokio::test]
    async fn test_refill_after_period() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            refill_period_seconds: 0,
            bucket_ttl_seconds: 3600,
        });
        let p = principal();

        limiter.consume(&p, "r", 1).await;
        // Period of zero refills on every touch
        assert_eq!(
            limiter.consume(&p, "r", 1).await,
            RateDecision::Allowed { remaining: 0 }
        );
    }

    #[tokio::test]
    async fn test_reset_and_sweep() {
        let limiter = RateLimiter::default();
        let p = principal();

        limiter.consume(&p, "r", 1).await;
        limiter.reset(&p, "r").await;
        assert_eq!(
            limiter.consume(&p, "r", 1).await,
            RateDecision::Allowed { remaining: 0 }
        );

        assert_eq!(limiter.bucket_count().await, 1);
        // TTL not reached: nothing swept
        assert_eq!(limiter.sweep_stale().await, 0);

        let eager = RateLimiter::new(RateLimiterConfig {
            refill_period_seconds: 60,
            bucket_ttl_seconds: 0,
        });
        eager.consume(&p, "r", 1).await;
        assert_eq!(eager.sweep_stale().await, 1);
        assert_eq!(eager.bucket_count().await, 0);
    }
}
