use anyhow::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use pricing_cache_gateway::adapter::PricingAdapter;
use pricing_cache_gateway::cache::CoalescingCache;
use pricing_cache_gateway::config::PricingCacheConfig;
use pricing_cache_gateway::handlers;
use pricing_cache_gateway::oracle_client::PricingOracleClient;
use pricing_cache_gateway::oracle_rate_limiter::{OracleRateLimitConfig, OracleRateLimiter};
use pricing_cache_gateway::request_id::request_id_middleware;
use pricing_cache_gateway::state::AppState;
use pricing_cache_gateway::store::{RedisStore, SharedStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    pricing_cache_gateway::logging::init();

    let config = PricingCacheConfig::from_env()?;
    config.log_config();

    tracing::info!("Connecting to shared store...");
    let store: Arc<dyn SharedStore> = Arc::new(RedisStore::connect(&config.redis_url).await?);

    let cache = Arc::new(CoalescingCache::new(Arc::clone(&store), config.clone()));

    let rate_limiter = OracleRateLimiter::new(OracleRateLimitConfig::default());
    let oracle = Arc::new(PricingOracleClient::new(
        config.oracle_url.clone(),
        config.oracle_token.clone(),
        rate_limiter,
    ));

    let adapter = Arc::new(PricingAdapter::new(cache, oracle));
    let state = AppState::new(adapter);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = handlers::routes(state)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(cors);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!("Pricing cache gateway listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
