//! Thin HTTP front end (spec.md §1 places routing out of the core's
//! scope; SPEC_FULL.md §2.1/§6 asks for a minimal one anyway). None of
//! the coalescing/lease/breaker logic lives here — every handler is a
//! boundary around [`crate::adapter::PricingAdapter`], not a
//! reimplementation of it.

use crate::error::PricingError;
use crate::fingerprint::AttributeRecord;
use crate::oracle_client::PricedRoom;
use crate::state::AppState;
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

/// `POST /api/pricing` — body is a JSON array of attribute records, each
/// recognizing `{period, hotel, room}`. Empty/malformed input returns an
/// empty array rather than an error (spec.md §4.6).
pub async fn fetch_pricing(
    State(state): State<AppState>,
    Json(attrs): Json<Vec<AttributeRecord>>,
) -> Result<Json<Vec<PricedRoom>>, PricingError> {
    let priced = state.adapter.fetch_pricing(&attrs).await?;
    Ok(Json(priced))
}

/// `GET /api/health` — liveness only. Matches spec.md's separation of
/// process liveness from upstream oracle health, which the breaker
/// tracks independently.
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "pricing-cache-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize)]
struct CacheStatsResponse {
    hits: u64,
    misses: u64,
    coalesced: u64,
    stale_served: u64,
    breaker_phase: &'static str,
}

/// `GET /api/cache/stats` — breaker phase and hit/miss/coalesced/stale
/// counters, read-only.
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let snapshot = state.adapter.cache_stats();
    Json(CacheStatsResponse {
        hits: snapshot.hits,
        misses: snapshot.misses,
        coalesced: snapshot.coalesced,
        stale_served: snapshot.stale_served,
        breaker_phase: snapshot.breaker_phase,
    })
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/pricing", post(fetch_pricing))
        .route("/api/health", get(health_check))
        .route("/api/cache/stats", get(cache_stats))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PricingAdapter;
    use crate::cache::CoalescingCache;
    use crate::config::PricingCacheConfig;
    use crate::oracle_client::PricingOracleClient;
    use crate::oracle_rate_limiter::{OracleRateLimitConfig, OracleRateLimiter};
    use crate::store::{InMemoryStore, SharedStore};
    use std::sync::Arc;

    fn test_state() -> AppState {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let cache = Arc::new(CoalescingCache::new(store, PricingCacheConfig::default()));
        let limiter = OracleRateLimiter::new(OracleRateLimitConfig::default());
        let oracle = Arc::new(PricingOracleClient::new(
            "http://127.0.0.1:1/unreachable".to_string(),
            None,
            limiter,
        ));
        AppState::new(Arc::new(PricingAdapter::new(cache, oracle)))
    }

    #[tokio::test]
    async fn empty_body_returns_empty_array() {
        let state = test_state();
        let Json(result) = fetch_pricing(State(state), Json(Vec::new())).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn stats_start_at_zero() {
        let state = test_state();
        let Json(stats) = cache_stats(State(state)).await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.breaker_phase, "closed");
    }
}
