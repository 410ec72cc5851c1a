use crate::clock::Clock;
use crate::domain::{Decision, PolicyTable};
use crate::errors::AppError;
use crate::observability::MetricsRecorder;
use crate::rate_limit::engine::DecisionEngine;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Everything the middleware needs to decide a request
#[derive(Clone)]
pub struct RateLimitState {
    pub engine: Arc<DecisionEngine>,
    pub policies: Arc<PolicyTable>,
    pub clock: Arc<dyn Clock>,
}

/// Rate limiting middleware
///
/// The identifier is the client address, the route is the request path.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let started = Instant::now();
    let method = request.method().to_string();

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identifier = extract_identifier(request.headers(), peer);
    let route = request.uri().path().to_string();

    let policy = state.policies.policy_for(&route);
    let decision = state
        .engine
        .check(&identifier, &route, policy, state.clock.now())
        .await?;

    let response = if decision.blocked {
        blocked_response(&decision)
    } else if !decision.allowed {
        limited_response(&decision)
    } else {
        let mut response = next.run(request).await;
        add_rate_limit_headers(response.headers_mut(), &decision);
        response
    };

    MetricsRecorder::record_http_duration(
        &method,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );

    Ok(response)
}

/// Client identifier: first `X-Forwarded-For` entry, then `X-Real-IP`,
/// then the peer address
pub(crate) fn extract_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded_for.to_str() {
            let first = value.split(',').next().unwrap_or_default().trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

fn limited_response(decision: &Decision) -> Response {
    let retry_after = decision.retry_after_header().unwrap_or(0);
    let body = Json(json!({
        "error": "Too Many Requests",
        "message": "Rate limit exceeded. Please try again later.",
        "retry_after": retry_after,
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    add_rate_limit_headers(response.headers_mut(), decision);
    response
}

fn blocked_response(decision: &Decision) -> Response {
    let retry_after = decision.retry_after_header().unwrap_or(0);
    let body = Json(json!({
        "error": "Temporarily Blocked",
        "message": "Your address has been temporarily blocked due to repeated rate limit violations.",
        "retry_after": retry_after,
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    add_rate_limit_headers(response.headers_mut(), decision);
    response
}

/// Add rate limit headers to response
fn add_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    insert_header(headers, "x-ratelimit-limit", decision.limit);
    insert_header(headers, "x-ratelimit-remaining", decision.remaining);
    insert_header(headers, "x-ratelimit-reset", decision.reset_header());

    // Only present on denial
    if let Some(retry_after) = decision.retry_after_header() {
        insert_header(headers, "retry-after", retry_after);
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RateLimitConfig;
    use crate::domain::{PolicyConfig, RoutePolicyConfig};
    use crate::rate_limit::{Algorithm, FailMode};
    use crate::store::MemoryStore;
    use axum::{
        body::{to_bytes, Body},
        middleware,
        routing::{get, post},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    const START: f64 = 1_700_000_000.0;

    fn limits_config() -> RateLimitConfig {
        RateLimitConfig {
            namespace: "test".to_string(),
            algorithm: Algorithm::SlidingWindow,
            fail_mode: FailMode::Open,
            store_timeout_ms: 200,
            key_ttl_buffer_seconds: 10,
            violation_threshold: 3,
            violation_window_seconds: 300,
            block_duration_seconds: 900,
            default_policy: PolicyConfig {
                requests: 3,
                window_seconds: 60,
                burst_size: None,
            },
            routes: vec![RoutePolicyConfig {
                path: "/auth/login".to_string(),
                requests: 1,
                window_seconds: 60,
                burst_size: None,
            }],
        }
    }

    fn app() -> (Arc<MemoryStore>, Router) {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let config = limits_config();

        let state = RateLimitState {
            engine: Arc::new(DecisionEngine::new(store.clone(), &config).unwrap()),
            policies: Arc::new(config.policy_table().unwrap()),
            clock,
        };

        let router = Router::new()
            .route("/api/data", get(|| async { "data" }))
            .route("/auth/login", post(|| async { "welcome" }))
            .layer(middleware::from_fn_with_state(state, rate_limit_middleware));

        (store, router)
    }

    fn request(method: &str, path: &str, client: &str) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(path)
            .header("x-forwarded-for", client)
            .body(Body::empty())
            .unwrap()
    }

    fn header(response: &Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_allowed_request_carries_headers() {
        let (_store, app) = app();

        let response = app
            .oneshot(request("GET", "/api/data", "198.51.100.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-limit").as_deref(), Some("3"));
        assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some("2"));
        assert_eq!(
            header(&response, "x-ratelimit-reset").as_deref(),
            Some("1700000060")
        );
        assert!(header(&response, "retry-after").is_none());
    }

    #[tokio::test]
    async fn test_denied_request_gets_429() {
        let (_store, app) = app();

        let first = app
            .clone()
            .oneshot(request("POST", "/auth/login", "198.51.100.2"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(request("POST", "/auth/login", "198.51.100.2"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&second, "x-ratelimit-remaining").as_deref(), Some("0"));
        assert_eq!(header(&second, "retry-after").as_deref(), Some("60"));

        let body = json_body(second).await;
        assert_eq!(body["error"], "Too Many Requests");
        assert_eq!(body["retry_after"], 60);
    }

    #[tokio::test]
    async fn test_routes_are_limited_independently() {
        let (_store, app) = app();

        app.clone()
            .oneshot(request("POST", "/auth/login", "198.51.100.3"))
            .await
            .unwrap();

        let data = app
            .oneshot(request("GET", "/api/data", "198.51.100.3"))
            .await
            .unwrap();
        assert_eq!(data.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_repeat_offender_is_blocked() {
        let (_store, app) = app();

        // One allowed, then three violations reach the threshold
        for _ in 0..4 {
            app.clone()
                .oneshot(request("POST", "/auth/login", "198.51.100.4"))
                .await
                .unwrap();
        }

        let response = app
            .oneshot(request("GET", "/api/data", "198.51.100.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, "retry-after").as_deref(), Some("900"));
        assert_eq!(header(&response, "x-ratelimit-limit").as_deref(), Some("3"));
        assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some("0"));
        assert_eq!(
            header(&response, "x-ratelimit-reset").as_deref(),
            Some("1700000900")
        );

        let body = json_body(response).await;
        assert_eq!(body["error"], "Temporarily Blocked");
    }

    #[tokio::test]
    async fn test_fail_open_passes_through() {
        let (store, app) = app();
        store.set_available(false);

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request("POST", "/auth/login", "198.51.100.5"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_oversized_path_is_bad_request() {
        let (_store, app) = app();
        let path = format!("/{}", "a".repeat(300));

        let response = app
            .oneshot(request("GET", &path, "198.51.100.6"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_extract_identifier_from_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.1.1, 10.0.0.1"));

        let identifier = extract_identifier(&headers, None);
        assert_eq!(identifier, "192.168.1.1");
    }

    #[test]
    fn test_extract_identifier_from_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.42"));

        let identifier = extract_identifier(&headers, None);
        assert_eq!(identifier, "203.0.113.42");
    }

    #[test]
    fn test_extract_identifier_from_peer() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "[2001:db8::1]:443".parse().unwrap();

        let identifier = extract_identifier(&headers, Some(peer));
        assert_eq!(identifier, "2001:db8::1");
    }

    #[test]
    fn test_extract_identifier_default() {
        let headers = HeaderMap::new();
        let identifier = extract_identifier(&headers, None);
        assert_eq!(identifier, "unknown");
    }
}
