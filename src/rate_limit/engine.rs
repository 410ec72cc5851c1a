//! Admission decision engine.
//!
//! One `check` call runs block gate, then the configured limiter, then (on
//! denial) the violation tracker. The engine keeps no state of its own: every
//! per-identifier fact lives in the shared store, and each store call is
//! bounded by a timeout. A failed or timed out call is answered with the
//! configured fail mode instead of an error.

use crate::config::RateLimitConfig;
use crate::domain::{Decision, KeyBuilder, KeySegment, Policy};
use crate::errors::{AppError, Result};
use crate::observability::MetricsRecorder;
use crate::rate_limit::block::{BlockGate, BlockStatus};
use crate::rate_limit::limiter::{Algorithm, RateLimiter};
use crate::rate_limit::violations::{ViolationOutcome, ViolationTracker};
use crate::store::StateStore;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// What to answer when the shared store cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Admit, keeping the protected service available
    Open,
    /// Deny, for deployments where the quota must hold
    Closed,
}

/// Violation and block state of one identifier
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Standing {
    pub violations: u64,
    pub blocked: bool,
    pub retry_after: Option<f64>,
}

#[derive(Clone)]
pub struct DecisionEngine {
    gate: BlockGate,
    limiter: RateLimiter,
    violations: ViolationTracker,
    fail_mode: FailMode,
    store_timeout: Duration,
}

impl DecisionEngine {
    pub fn new(store: Arc<dyn StateStore>, config: &RateLimitConfig) -> Result<Self> {
        config.validate()?;

        let keys = KeyBuilder::new(&config.namespace)?;
        let gate = BlockGate::new(store.clone(), keys.clone(), config.block_duration_seconds);
        let violations = ViolationTracker::new(
            store.clone(),
            keys.clone(),
            config.violation_threshold,
            config.violation_window_seconds,
            gate.clone(),
        );
        let limiter = RateLimiter::new(
            config.algorithm,
            store,
            keys,
            config.key_ttl_buffer_seconds,
        );

        tracing::info!(
            algorithm = %config.algorithm,
            fail_mode = ?config.fail_mode,
            violation_threshold = config.violation_threshold,
            block_duration_seconds = config.block_duration_seconds,
            "Decision engine configured"
        );

        Ok(Self {
            gate,
            limiter,
            violations,
            fail_mode: config.fail_mode,
            store_timeout: Duration::from_millis(config.store_timeout_ms),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.limiter.algorithm()
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    pub fn violation_threshold(&self) -> u64 {
        self.violations.threshold()
    }

    pub fn violation_window_seconds(&self) -> u64 {
        self.violations.window_seconds()
    }

    pub fn block_duration_seconds(&self) -> u64 {
        self.gate.block_duration_seconds()
    }

    /// Decide one request.
    ///
    /// Fails only for identifiers or routes that cannot be turned into a
    /// storage key. Store failures resolve to the fail-mode decision.
    pub async fn check(
        &self,
        identifier: &str,
        route: &str,
        policy: &Policy,
        now: f64,
    ) -> Result<Decision> {
        let identifier = KeySegment::new(identifier)?;
        let route = KeySegment::new(route)?;

        let started = Instant::now();
        let (decision, outcome) = match self.evaluate(&identifier, &route, policy, now).await {
            Ok(evaluated) => evaluated,
            Err(err) => self.degraded(&identifier, policy, now, &err),
        };
        MetricsRecorder::record_check_duration(started.elapsed().as_secs_f64());
        MetricsRecorder::record_decision(self.algorithm().as_str(), outcome);

        debug!(
            identifier = %identifier,
            route = %route,
            allowed = decision.allowed,
            blocked = decision.blocked,
            remaining = decision.remaining,
            outcome,
            "Admission decision"
        );

        Ok(decision)
    }

    async fn evaluate(
        &self,
        identifier: &KeySegment,
        route: &KeySegment,
        policy: &Policy,
        now: f64,
    ) -> Result<(Decision, &'static str)> {
        // Blocked identifiers never reach the limiter, so its state stays frozen
        if let BlockStatus::Blocked { retry_after } =
            self.guard("block_gate", self.gate.status(identifier)).await?
        {
            return Ok((Decision::blocked(policy, now, retry_after), "blocked"));
        }

        let decision = self
            .guard("limiter", self.limiter.check(identifier, route, policy, now))
            .await?;
        if decision.allowed {
            return Ok((decision, "allowed"));
        }

        warn!(
            identifier = %identifier,
            route = %route,
            limit = decision.limit,
            "Rate limit exceeded"
        );

        // The denial already stands; a failure here only loses one violation
        match self
            .guard("violations", self.violations.record(identifier, now))
            .await
        {
            Ok(ViolationOutcome::Blocked { .. }) => MetricsRecorder::record_block(),
            Ok(ViolationOutcome::Recorded { .. }) => {}
            Err(err) => warn!(
                identifier = %identifier,
                error = %err,
                "Failed to record violation"
            ),
        }

        Ok((decision, "denied"))
    }

    fn degraded(
        &self,
        identifier: &KeySegment,
        policy: &Policy,
        now: f64,
        err: &AppError,
    ) -> (Decision, &'static str) {
        match self.fail_mode {
            FailMode::Open => {
                error!(
                    identifier = %identifier,
                    error = %err,
                    "Store unavailable, failing open"
                );
                (Decision::fail_open(policy, now), "fail_open")
            }
            FailMode::Closed => {
                error!(
                    identifier = %identifier,
                    error = %err,
                    "Store unavailable, failing closed"
                );
                (Decision::fail_closed(policy, now), "fail_closed")
            }
        }
    }

    /// Bound a store call by the configured timeout. A timeout is reported
    /// as `StoreUnavailable`; the dropped call either committed or did not.
    async fn guard<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let outcome = match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(elapsed) => Err(elapsed.into()),
        };

        if outcome.is_err() {
            MetricsRecorder::record_store_error(operation);
        }
        outcome
    }

    /// Violations and block state for one identifier, without recording anything
    pub async fn standing(&self, identifier: &str, now: f64) -> Result<Standing> {
        let identifier = KeySegment::new(identifier)?;

        let status = self.guard("block_gate", self.gate.status(&identifier)).await?;
        let violations = self
            .guard("violations", self.violations.count(&identifier, now))
            .await?;

        Ok(match status {
            BlockStatus::Unblocked => Standing {
                violations,
                blocked: false,
                retry_after: None,
            },
            BlockStatus::Blocked { retry_after } => Standing {
                violations,
                blocked: true,
                retry_after: Some(retry_after),
            },
        })
    }

    /// Clear limiter state for one identifier and route. Block state is untouched.
    pub async fn reset(&self, identifier: &str, route: &str) -> Result<()> {
        let identifier = KeySegment::new(identifier)?;
        let route = KeySegment::new(route)?;
        self.guard("limiter", self.limiter.reset(&identifier, &route))
            .await
    }
}
