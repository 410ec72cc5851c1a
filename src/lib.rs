// API Bouncer Library

pub mod api;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod rate_limit;
pub mod redis;
pub mod store;

pub use config::Config;
pub use errors::{AppError, Result};
