//! Pricing Adapter (spec §4.6): wraps the upstream call into the fetcher
//! callable the coalescing cache takes, and owns fingerprint derivation.

use crate::cache::{CacheStatsSnapshot, CoalescingCache};
use crate::error::PricingError;
use crate::fingerprint::{self, AttributeRecord};
use crate::oracle_client::{PricedRoom, PricingOracleClient};
use std::sync::Arc;

pub struct PricingAdapter {
    cache: Arc<CoalescingCache>,
    oracle: Arc<PricingOracleClient>,
}

impl PricingAdapter {
    pub fn new(cache: Arc<CoalescingCache>, oracle: Arc<PricingOracleClient>) -> Self {
        Self { cache, oracle }
    }

    /// Breaker phase + hit/miss/coalesced/stale counters, for the
    /// read-only `/api/cache/stats` endpoint.
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    /// Empty/invalid `attrs` yields an empty sequence without ever
    /// touching the cache — the fingerprint's empty sentinel short-circuits
    /// here rather than becoming a real cache key.
    pub async fn fetch_pricing(&self, attrs: &[AttributeRecord]) -> Result<Vec<PricedRoom>, PricingError> {
        let key = fingerprint::fingerprint(attrs);
        if key.is_empty_sentinel() {
            return Ok(Vec::new());
        }

        let oracle = Arc::clone(&self.oracle);
        let attrs = attrs.to_vec();
        self.cache
            .fetch(key.as_str(), move || {
                let oracle = Arc::clone(&oracle);
                let attrs = attrs.clone();
                async move { oracle.fetch_prices(&attrs).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PricingCacheConfig;
    use crate::oracle_rate_limiter::{OracleRateLimitConfig, OracleRateLimiter};
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record(period: &str, hotel: &str, room: &str) -> AttributeRecord {
        BTreeMap::from([
            ("period".to_string(), json!(period)),
            ("hotel".to_string(), json!(hotel)),
            ("room".to_string(), json!(room)),
        ])
    }

    fn adapter(oracle_url: &str) -> PricingAdapter {
        let store: Arc<dyn crate::store::SharedStore> = Arc::new(InMemoryStore::new());
        let cache = Arc::new(CoalescingCache::new(store, PricingCacheConfig::default()));
        let limiter = OracleRateLimiter::new(OracleRateLimitConfig::default());
        let oracle = Arc::new(PricingOracleClient::new(
            oracle_url.to_string(),
            None,
            limiter,
        ));
        PricingAdapter::new(cache, oracle)
    }

    #[tokio::test]
    async fn empty_attributes_never_touch_the_cache() {
        let adapter = adapter("http://127.0.0.1:1/unreachable");
        let result = adapter.fetch_pricing(&[]).await.unwrap();
        assert!(result.is_empty());
    }
}
