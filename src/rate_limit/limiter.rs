use crate::domain::{Decision, KeyBuilder, KeySegment, Policy};
use crate::errors::Result;
use crate::rate_limit::sliding_window::SlidingWindowRateLimiter;
use crate::rate_limit::token_bucket::TokenBucketRateLimiter;
use crate::store::StateStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Limiting algorithm, chosen once per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    SlidingWindow,
    TokenBucket,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The configured limiter. Every identifier and route in a deployment goes
/// through the same variant; only the policy differs per route.
#[derive(Clone)]
pub enum RateLimiter {
    SlidingWindow(SlidingWindowRateLimiter),
    TokenBucket(TokenBucketRateLimiter),
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(
        algorithm: Algorithm,
        store: Arc<dyn StateStore>,
        keys: KeyBuilder,
        ttl_buffer_seconds: u64,
    ) -> Self {
        match algorithm {
            Algorithm::SlidingWindow => RateLimiter::SlidingWindow(
                SlidingWindowRateLimiter::new(store, keys, ttl_buffer_seconds),
            ),
            Algorithm::TokenBucket => RateLimiter::TokenBucket(TokenBucketRateLimiter::new(
                store,
                keys,
                ttl_buffer_seconds,
            )),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            RateLimiter::SlidingWindow(_) => Algorithm::SlidingWindow,
            RateLimiter::TokenBucket(_) => Algorithm::TokenBucket,
        }
    }

    pub async fn check(
        &self,
        identifier: &KeySegment,
        route: &KeySegment,
        policy: &Policy,
        now: f64,
    ) -> Result<Decision> {
        match self {
            RateLimiter::SlidingWindow(limiter) => {
                limiter.check(identifier, route, policy, now).await
            }
            RateLimiter::TokenBucket(limiter) => limiter.check(identifier, route, policy, now).await,
        }
    }

    /// Reset rate limit state for one identifier and route
    pub async fn reset(&self, identifier: &KeySegment, route: &KeySegment) -> Result<()> {
        match self {
            RateLimiter::SlidingWindow(limiter) => limiter.reset(identifier, route).await,
            RateLimiter::TokenBucket(limiter) => limiter.reset(identifier, route).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::MemoryStore;

    fn build(algorithm: Algorithm) -> (Arc<ManualClock>, Arc<MemoryStore>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let limiter = RateLimiter::new(
            algorithm,
            store.clone(),
            KeyBuilder::new("ns").unwrap(),
            10,
        );
        (clock, store, limiter)
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(Algorithm::SlidingWindow.to_string(), "sliding_window");
        assert_eq!(Algorithm::TokenBucket.as_str(), "token_bucket");
    }

    #[tokio::test]
    async fn test_variant_selects_key_family() {
        let id = KeySegment::new("u1").unwrap();
        let route = KeySegment::new("/x").unwrap();
        let policy = Policy::new(2, 60, 2).unwrap();

        let (clock, store, sliding) = build(Algorithm::SlidingWindow);
        assert_eq!(sliding.algorithm(), Algorithm::SlidingWindow);
        sliding.check(&id, &route, &policy, clock.now()).await.unwrap();
        assert_eq!(store.live_keys(), vec!["ns:sliding_window:u1:/x".to_string()]);

        let (clock, store, bucket) = build(Algorithm::TokenBucket);
        assert_eq!(bucket.algorithm(), Algorithm::TokenBucket);
        bucket.check(&id, &route, &policy, clock.now()).await.unwrap();
        assert_eq!(store.live_keys(), vec!["ns:token_bucket:u1:/x".to_string()]);
    }

    #[tokio::test]
    async fn test_reset_clears_either_variant() {
        let id = KeySegment::new("u1").unwrap();
        let route = KeySegment::new("/x").unwrap();
        let policy = Policy::new(1, 60, 1).unwrap();

        for algorithm in [Algorithm::SlidingWindow, Algorithm::TokenBucket] {
            let (clock, store, limiter) = build(algorithm);
            limiter.check(&id, &route, &policy, clock.now()).await.unwrap();
            assert!(!limiter.check(&id, &route, &policy, clock.now()).await.unwrap().allowed);

            limiter.reset(&id, &route).await.unwrap();
            assert!(store.live_keys().is_empty());
            assert!(limiter.check(&id, &route, &policy, clock.now()).await.unwrap().allowed);
        }
    }
}
