// Rate limit policies and the per-route policy table

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw policy as it appears in configuration, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    pub requests: i64,
    pub window_seconds: i64,
    /// Defaults to `requests` when omitted
    pub burst_size: Option<i64>,
}

/// Route-specific policy entry in configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RoutePolicyConfig {
    pub path: String,
    pub requests: i64,
    pub window_seconds: i64,
    pub burst_size: Option<i64>,
}

impl RoutePolicyConfig {
    fn policy(&self) -> PolicyConfig {
        PolicyConfig {
            requests: self.requests,
            window_seconds: self.window_seconds,
            burst_size: self.burst_size,
        }
    }
}

/// A validated rate limit policy. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Policy {
    requests: u64,
    window_seconds: u64,
    burst_size: u64,
}

impl Policy {
    /// Build a policy, rejecting non-positive limits and bursts below the limit
    pub fn new(requests: u64, window_seconds: u64, burst_size: u64) -> Result<Self> {
        if requests == 0 {
            return Err(AppError::InvalidPolicy(
                "requests must be positive".to_string(),
            ));
        }
        if window_seconds == 0 {
            return Err(AppError::InvalidPolicy(
                "window_seconds must be positive".to_string(),
            ));
        }
        if burst_size < requests {
            return Err(AppError::InvalidPolicy(format!(
                "burst_size ({}) must be at least requests ({})",
                burst_size, requests
            )));
        }

        Ok(Self {
            requests,
            window_seconds,
            burst_size,
        })
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn burst_size(&self) -> u64 {
        self.burst_size
    }

    /// Token refill rate in tokens per second
    pub fn refill_rate(&self) -> f64 {
        self.requests as f64 / self.window_seconds as f64
    }
}

impl TryFrom<&PolicyConfig> for Policy {
    type Error = AppError;

    fn try_from(raw: &PolicyConfig) -> Result<Self> {
        let positive = |value: i64, field: &str| -> Result<u64> {
            u64::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| AppError::InvalidPolicy(format!("{} must be positive", field)))
        };

        let requests = positive(raw.requests, "requests")?;
        let window_seconds = positive(raw.window_seconds, "window_seconds")?;
        let burst_size = match raw.burst_size {
            Some(burst) => positive(burst, "burst_size")?,
            None => requests,
        };

        Policy::new(requests, window_seconds, burst_size)
    }
}

/// Route to policy mapping, resolved once at startup
#[derive(Debug, Clone)]
pub struct PolicyTable {
    default: Policy,
    routes: HashMap<String, Policy>,
}

impl PolicyTable {
    pub fn new(default: Policy) -> Self {
        Self {
            default,
            routes: HashMap::new(),
        }
    }

    pub fn with_route(mut self, route: impl Into<String>, policy: Policy) -> Self {
        self.routes.insert(route.into(), policy);
        self
    }

    /// Build the table from configuration, validating every policy
    pub fn from_config(default: &PolicyConfig, routes: &[RoutePolicyConfig]) -> Result<Self> {
        let mut table = Self::new(Policy::try_from(default)?);

        for route in routes {
            let policy = Policy::try_from(&route.policy()).map_err(|e| match e {
                AppError::InvalidPolicy(msg) => {
                    AppError::InvalidPolicy(format!("route {}: {}", route.path, msg))
                }
                other => other,
            })?;
            table.routes.insert(route.path.clone(), policy);
        }

        Ok(table)
    }

    /// Policy for a route path: exact match, else the default
    pub fn policy_for(&self, route: &str) -> &Policy {
        self.routes.get(route).unwrap_or(&self.default)
    }

    pub fn default_policy(&self) -> &Policy {
        &self.default
    }

    pub fn routes(&self) -> impl Iterator<Item = (&String, &Policy)> {
        self.routes.iter()
    }
}
