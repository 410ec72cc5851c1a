use crate::domain::{Decision, KeyBuilder, KeySegment, Policy};
use crate::errors::Result;
use crate::rate_limit::window::WindowedCounter;
use crate::store::StateStore;
use std::sync::Arc;

/// Sliding window log limiter: exact admissions per trailing window
#[derive(Clone)]
pub struct SlidingWindowRateLimiter {
    store: Arc<dyn StateStore>,
    keys: KeyBuilder,
    ttl_buffer_seconds: u64,
}

impl SlidingWindowRateLimiter {
    /// Create a new sliding window rate limiter
    pub fn new(store: Arc<dyn StateStore>, keys: KeyBuilder, ttl_buffer_seconds: u64) -> Self {
        Self {
            store,
            keys,
            ttl_buffer_seconds,
        }
    }

    /// Check if a request is allowed, logging it only when admitted
    pub async fn check(
        &self,
        identifier: &KeySegment,
        route: &KeySegment,
        policy: &Policy,
        now: f64,
    ) -> Result<Decision> {
        let key = self.keys.sliding_window(identifier, route);
        let window = policy.window_seconds() as f64;

        tracing::debug!(
            key = %key,
            limit = policy.requests(),
            window_seconds = policy.window_seconds(),
            "Checking sliding window"
        );

        let counter = WindowedCounter::new(
            self.store.clone(),
            policy.window_seconds(),
            self.ttl_buffer_seconds,
        );
        let admission = counter.admit(&key, now, policy.requests()).await?;

        let decision = if admission.admitted {
            Decision {
                allowed: true,
                limit: policy.requests(),
                remaining: policy.requests().saturating_sub(admission.count + 1),
                reset_at: now + window,
                retry_after: None,
                blocked: false,
            }
        } else {
            // Wait until the oldest entry leaves the window
            let retry_after = admission
                .oldest
                .map(|oldest| (oldest + window - now).max(0.0))
                .unwrap_or(window);

            Decision {
                allowed: false,
                limit: policy.requests(),
                remaining: 0,
                reset_at: now + window,
                retry_after: Some(retry_after),
                blocked: false,
            }
        };

        tracing::debug!(
            key = %key,
            allowed = decision.allowed,
            current = admission.count,
            remaining = decision.remaining,
            "Sliding window result"
        );

        Ok(decision)
    }

    /// Drop the window for one identifier and route
    pub async fn reset(&self, identifier: &KeySegment, route: &KeySegment) -> Result<()> {
        let key = self.keys.sliding_window(identifier, route);
        self.store.delete(&key).await?;

        tracing::info!(key = %key, "Rate limit reset");

        Ok(())
    }
}
