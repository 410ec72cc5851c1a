//! Sample endpoints sitting behind the rate limiter

use crate::rate_limit::{middleware::extract_identifier, RateLimitState};
use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Welcome to API Bouncer",
        "description": "Distributed rate limiting in front of an HTTP API",
        "endpoints": {
            "/": "This endpoint (default policy)",
            "/api/data": "Sample data endpoint (default policy)",
            "/auth/login": "Login endpoint (strict policy)",
            "/auth/register": "Register endpoint (strict policy)",
            "/auth/reset-password": "Password reset endpoint (strict policy)",
            "/stats": "Rate limit settings and your standing"
        }
    }))
}

/// GET /api/data
pub async fn data() -> Json<Value> {
    Json(json!({
        "data": [
            {"id": 1, "name": "Item 1"},
            {"id": 2, "name": "Item 2"},
            {"id": 3, "name": "Item 3"}
        ]
    }))
}

/// POST /auth/login
pub async fn login() -> Json<Value> {
    Json(json!({ "message": "Login successful" }))
}

/// POST /auth/register
pub async fn register() -> Json<Value> {
    Json(json!({ "message": "Registration successful" }))
}

/// POST /auth/reset-password
pub async fn reset_password() -> Json<Value> {
    Json(json!({ "message": "Password reset email sent" }))
}

/// GET /stats - limiter settings plus the caller's violation standing
#[tracing::instrument(skip_all)]
pub async fn stats(
    State(limits): State<RateLimitState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Json<Value> {
    let identifier = extract_identifier(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let engine = &limits.engine;

    let mut routes = Map::new();
    for (path, policy) in limits.policies.routes() {
        routes.insert(path.clone(), json!(policy));
    }

    let standing = match engine.standing(&identifier, limits.clock.now()).await {
        Ok(standing) => json!(standing),
        Err(e) => {
            tracing::warn!(identifier = %identifier, error = %e, "Standing unavailable");
            Value::Null
        }
    };

    Json(json!({
        "identifier": identifier,
        "algorithm": engine.algorithm(),
        "fail_mode": engine.fail_mode(),
        "policies": {
            "default": limits.policies.default_policy(),
            "routes": routes,
        },
        "violation_tracking": {
            "threshold": engine.violation_threshold(),
            "window_seconds": engine.violation_window_seconds(),
            "block_duration_seconds": engine.block_duration_seconds(),
        },
        "standing": standing,
    }))
}
