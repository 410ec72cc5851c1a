use api_bouncer::{
    api::{create_router, AppState},
    clock::SystemClock,
    config::Config,
    observability::{init_tracing, HealthChecker},
    rate_limit::{DecisionEngine, RateLimitState},
    redis::{create_client, RedisStore},
    store::StateStore,
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize tracing/logging
    init_tracing(&config.observability)?;

    tracing::info!("Starting API Bouncer");
    tracing::info!("Configuration loaded: {:?}", config.server);

    // Create Redis connection
    let redis_manager = create_client(&config.redis).await?;
    tracing::info!("Redis connection established");

    let store: Arc<dyn StateStore> = Arc::new(RedisStore::new(redis_manager));
    let policies = config.rate_limit.policy_table()?;
    let engine = DecisionEngine::new(store.clone(), &config.rate_limit)?;

    let state = AppState {
        limits: RateLimitState {
            engine: Arc::new(engine),
            policies: Arc::new(policies),
            clock: Arc::new(SystemClock),
        },
        health_checker: Arc::new(HealthChecker::new(store)),
    };

    // Create router
    let app = create_router(state);

    // Bind server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("API Bouncer is ready to accept requests");

    // Peer addresses are the identifier of last resort
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
