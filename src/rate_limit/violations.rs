use crate::domain::{KeyBuilder, KeySegment};
use crate::errors::Result;
use crate::rate_limit::block::BlockGate;
use crate::rate_limit::window::WindowedCounter;
use crate::store::StateStore;
use std::sync::Arc;

/// What recording a violation led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationOutcome {
    Recorded { violations: u64 },
    Blocked { violations: u64 },
}

/// Counts denied requests per identifier across all routes and blocks
/// repeat offenders
#[derive(Clone)]
pub struct ViolationTracker {
    counter: WindowedCounter,
    keys: KeyBuilder,
    threshold: u64,
    gate: BlockGate,
}

impl ViolationTracker {
    pub fn new(
        store: Arc<dyn StateStore>,
        keys: KeyBuilder,
        threshold: u64,
        window_seconds: u64,
        gate: BlockGate,
    ) -> Self {
        Self {
            // Violation keys live exactly as long as the violation window
            counter: WindowedCounter::new(store, window_seconds, 0),
            keys,
            threshold,
            gate,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn window_seconds(&self) -> u64 {
        self.counter.window_seconds()
    }

    /// Record one denied request; blocks the identifier at the threshold
    pub async fn record(&self, identifier: &KeySegment, now: f64) -> Result<ViolationOutcome> {
        let key = self.keys.violations(identifier);
        let violations = self.counter.record(&key, now).await?;

        if violations >= self.threshold {
            self.gate.block(identifier, violations, now).await?;
            return Ok(ViolationOutcome::Blocked { violations });
        }

        tracing::debug!(
            identifier = %identifier,
            violations,
            threshold = self.threshold,
            "Violation recorded"
        );

        Ok(ViolationOutcome::Recorded { violations })
    }

    /// Violations currently in the window
    pub async fn count(&self, identifier: &KeySegment, now: f64) -> Result<u64> {
        let key = self.keys.violations(identifier);
        self.counter.peek(&key, now).await
    }
}
