// Token bucket arithmetic. The Redis script in `redis::store` mirrors `take`.

/// Persisted bucket: `0 <= tokens <= burst_size`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill: f64,
}

/// Result of trying to take one token
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketTake {
    pub allowed: bool,
    /// State written back to the store
    pub state: BucketState,
}

impl BucketState {
    /// Refill by elapsed time, cap at `burst`, then take one token if available.
    ///
    /// A missing bucket starts full at `now`. Elapsed time is clamped at zero
    /// so a caller with a lagging clock never drains the bucket.
    pub fn take(current: Option<BucketState>, now: f64, rate: f64, burst: f64) -> BucketTake {
        let (tokens, last_refill) = match current {
            Some(state) => (state.tokens, state.last_refill),
            None => (burst, now),
        };

        let elapsed = (now - last_refill).max(0.0);
        let refilled = (tokens + elapsed * rate).clamp(0.0, burst);

        let (allowed, tokens) = if refilled >= 1.0 {
            (true, refilled - 1.0)
        } else {
            (false, refilled)
        };

        BucketTake {
            allowed,
            state: BucketState {
                tokens,
                last_refill: now,
            },
        }
    }

    /// Seconds until at least one token is available
    pub fn seconds_until_token(&self, rate: f64) -> f64 {
        ((1.0 - self.tokens) / rate).max(0.0)
    }
}
