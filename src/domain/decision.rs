use crate::domain::policy::Policy;
use serde::Serialize;

/// Outcome of one admission check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Ceiling reported as `X-RateLimit-Limit`
    pub limit: u64,
    /// Requests left before the next denial; never negative
    pub remaining: u64,
    /// Unix timestamp (fractional seconds) when the quota frees up
    pub reset_at: f64,
    /// Seconds to wait before retrying, set only on denial
    pub retry_after: Option<f64>,
    /// Denied by the block gate rather than the limiter
    pub blocked: bool,
}

impl Decision {
    /// Decision used when the store cannot be reached and the engine fails open
    pub fn fail_open(policy: &Policy, now: f64) -> Self {
        Self {
            allowed: true,
            limit: policy.requests(),
            remaining: policy.requests(),
            reset_at: now + policy.window_seconds() as f64,
            retry_after: None,
            blocked: false,
        }
    }

    /// Decision used when the store cannot be reached and the engine fails closed
    pub fn fail_closed(policy: &Policy, now: f64) -> Self {
        let window = policy.window_seconds() as f64;
        Self {
            allowed: false,
            limit: policy.requests(),
            remaining: 0,
            reset_at: now + window,
            retry_after: Some(window),
            blocked: false,
        }
    }

    /// Decision for an identifier held by the block gate
    pub fn blocked(policy: &Policy, now: f64, retry_after: f64) -> Self {
        Self {
            allowed: false,
            limit: policy.requests(),
            remaining: 0,
            reset_at: now + retry_after,
            retry_after: Some(retry_after),
            blocked: true,
        }
    }

    /// `Retry-After` header value: whole seconds, rounded up, only on denial
    pub fn retry_after_header(&self) -> Option<u64> {
        if self.allowed {
            return None;
        }
        self.retry_after.map(|secs| secs.max(0.0).ceil() as u64)
    }

    /// `X-RateLimit-Reset` header value in unix seconds
    pub fn reset_header(&self) -> u64 {
        self.reset_at.max(0.0) as u64
    }
}
