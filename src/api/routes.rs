use crate::{
    api::{demo, health},
    observability::HealthChecker,
    rate_limit::{rate_limit_middleware, RateLimitState},
};
use axum::{
    extract::FromRef,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub limits: RateLimitState,
    pub health_checker: Arc<HealthChecker>,
}

pub fn create_router(state: AppState) -> Router {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        // Probes and metrics are never rate limited
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .merge(limited_routes(state.limits.clone()))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Add state
        .with_state(state)
}

fn limited_routes(limits: RateLimitState) -> Router<AppState> {
    Router::new()
        .route("/", get(demo::root))
        .route("/api/data", get(demo::data))
        .route("/auth/login", post(demo::login))
        .route("/auth/register", post(demo::register))
        .route("/auth/reset-password", post(demo::reset_password))
        .route("/stats", get(demo::stats))
        .route_layer(middleware::from_fn_with_state(limits, rate_limit_middleware))
}
