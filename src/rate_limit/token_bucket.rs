use crate::domain::{Decision, KeyBuilder, KeySegment, Policy};
use crate::errors::Result;
use crate::store::StateStore;
use std::sync::Arc;

/// Token bucket limiter: bursts up to `burst_size`, refilled at
/// `requests / window_seconds` tokens per second
#[derive(Clone)]
pub struct TokenBucketRateLimiter {
    store: Arc<dyn StateStore>,
    keys: KeyBuilder,
    ttl_buffer_seconds: u64,
}

impl TokenBucketRateLimiter {
    pub fn new(store: Arc<dyn StateStore>, keys: KeyBuilder, ttl_buffer_seconds: u64) -> Self {
        Self {
            store,
            keys,
            ttl_buffer_seconds,
        }
    }

    /// Bucket keys outlive a full refill, so an expired bucket and a full one
    /// are indistinguishable.
    fn ttl(&self, policy: &Policy) -> u64 {
        let refill_seconds = policy
            .burst_size()
            .saturating_mul(policy.window_seconds())
            .div_ceil(policy.requests());
        policy.window_seconds().max(refill_seconds) + self.ttl_buffer_seconds
    }

    pub async fn check(
        &self,
        identifier: &KeySegment,
        route: &KeySegment,
        policy: &Policy,
        now: f64,
    ) -> Result<Decision> {
        let key = self.keys.token_bucket(identifier, route);
        let rate = policy.refill_rate();

        let take = self
            .store
            .bucket_take(
                &key,
                now,
                rate,
                policy.burst_size() as f64,
                self.ttl(policy),
            )
            .await?;

        let wait = take.state.seconds_until_token(rate);
        let decision = Decision {
            allowed: take.allowed,
            limit: policy.burst_size(),
            remaining: take.state.tokens.floor() as u64,
            reset_at: now + wait,
            retry_after: (!take.allowed).then_some(wait),
            blocked: false,
        };

        tracing::debug!(
            key = %key,
            allowed = decision.allowed,
            tokens = take.state.tokens,
            "Token bucket result"
        );

        Ok(decision)
    }

    pub async fn reset(&self, identifier: &KeySegment, route: &KeySegment) -> Result<()> {
        let key = self.keys.token_bucket(identifier, route);
        self.store.delete(&key).await?;

        tracing::info!(key = %key, "Token bucket reset");

        Ok(())
    }
}
