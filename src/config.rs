use crate::domain::{PolicyConfig, PolicyTable, RoutePolicyConfig};
use crate::errors::{AppError, Result};
use crate::rate_limit::{Algorithm, FailMode};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub rate_limit: RateLimitConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Prefix for every key this service writes
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub algorithm: Algorithm,
    pub fail_mode: FailMode,
    /// Upper bound on any single store call; exceeding it counts as an outage
    pub store_timeout_ms: u64,
    /// Added to the window to form the TTL of limiter keys
    #[serde(default = "default_key_ttl_buffer")]
    pub key_ttl_buffer_seconds: u64,
    pub violation_threshold: u64,
    pub violation_window_seconds: u64,
    pub block_duration_seconds: u64,
    pub default_policy: PolicyConfig,
    #[serde(default)]
    pub routes: Vec<RoutePolicyConfig>,
}

fn default_namespace() -> String {
    "api_bouncer".to_string()
}

fn default_key_ttl_buffer() -> u64 {
    10
}

impl RateLimitConfig {
    /// Resolve and validate the per-route policy table
    pub fn policy_table(&self) -> Result<PolicyTable> {
        PolicyTable::from_config(&self.default_policy, &self.routes)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.store_timeout_ms == 0 {
            return Err(AppError::Configuration(
                "store_timeout_ms must be positive".to_string(),
            ));
        }
        if self.violation_threshold == 0 {
            return Err(AppError::Configuration(
                "violation_threshold must be positive".to_string(),
            ));
        }
        if self.violation_window_seconds == 0 || self.block_duration_seconds == 0 {
            return Err(AppError::Configuration(
                "violation window and block duration must be positive".to_string(),
            ));
        }

        // Policies are rejected here rather than on the first request
        self.policy_table()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let environment =
            env::var("API_BOUNCER_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(
                config::File::with_name(&format!("config/{}", environment)).required(false),
            )
            // e.g., API_BOUNCER__RATE_LIMIT__ALGORITHM=token_bucket
            .add_source(
                config::Environment::with_prefix("API_BOUNCER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Configuration(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Configuration(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AppError::Configuration("Invalid port number".to_string()));
        }

        if self.redis.url.is_empty() {
            return Err(AppError::Configuration(
                "Redis URL is required".to_string(),
            ));
        }

        self.rate_limit.validate()?;

        Ok(())
    }
}
