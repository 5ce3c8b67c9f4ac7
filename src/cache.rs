//! The coalescing cache orchestrator (spec §4.4): cache lookup, leader
//! election via the lease, leader-path fetch+publish, follower-path
//! wait-with-retry, stale fallback on circuit open.

use crate::breaker::{Admission, BreakerPhase, CircuitBreaker};
use crate::config::PricingCacheConfig;
use crate::error::PricingError;
use crate::lease::DistributedLease;
use crate::rendezvous::{self, Handle, WaitOutcome};
use crate::store::SharedStore;
use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn stale_key_for(fresh_key: &str) -> String {
    match fresh_key.strip_prefix("pricing:") {
        Some(digest) => format!("pricing:stale:{digest}"),
        None => format!("pricing:stale:{fresh_key}"),
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    stale_served: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub stale_served: u64,
    pub breaker_phase: &'static str,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
    fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }
    fn record_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct CoalescingCache {
    store: Arc<dyn SharedStore>,
    lease: DistributedLease,
    breaker: CircuitBreaker,
    config: PricingCacheConfig,
    stats: CacheStats,
}

impl CoalescingCache {
    pub fn new(store: Arc<dyn SharedStore>, config: PricingCacheConfig) -> Self {
        let lease = DistributedLease::new(Arc::clone(&store));
        let breaker = CircuitBreaker::new(crate::breaker::CircuitBreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            cooldown: config.breaker_cooldown,
        });
        Self {
            store,
            lease,
            breaker,
            config,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
            stale_served: self.stats.stale_served.load(Ordering::Relaxed),
            breaker_phase: match self.breaker.phase() {
                BreakerPhase::Closed => "closed",
                BreakerPhase::Open => "open",
                BreakerPhase::HalfOpen => "half_open",
            },
        }
    }

    async fn read_fresh<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(key, error = %err, "corrupt cache entry treated as absent");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache read failed, treated as miss");
                None
            }
        }
    }

    async fn read_stale<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read_fresh(&stale_key_for(key)).await
    }

    /// `fetch(K, fetcher)` from spec §4.4. `fetcher` is invoked at most
    /// once per call, and only by whichever concurrent caller wins the
    /// lease.
    pub async fn fetch<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<T, PricingError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, PricingError>> + Send,
    {
        let max_attempts = self.config.follower_max_retries + 1;
        let mut backoff = Duration::from_millis(200);

        for attempt in 0..max_attempts {
            if let Some(value) = self.read_fresh::<T>(key).await {
                self.stats.record_hit();
                return Ok(value);
            }
            self.stats.record_miss();

            match self.breaker.phase() {
                BreakerPhase::Open => {
                    return self.stale_or_unavailable(key).await;
                }
                BreakerPhase::Closed | BreakerPhase::HalfOpen => {}
            }

            match self.lead(key, &fetcher).await {
                Some(result) => return result,
                None => {
                    // Lost the lease race; become a follower for this attempt.
                    self.stats.record_coalesced();
                    match self.follow(key).await? {
                        Some(value) => return Ok(value),
                        None => {
                            if attempt + 1 >= max_attempts {
                                break;
                            }
                            let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
                            let jittered = backoff.mul_f64(1.0 + jitter);
                            tokio::time::sleep(jittered).await;
                            backoff *= 2;
                        }
                    }
                }
            }
        }

        self.stale_or_wait_timeout(key).await
    }

    /// Attempts leader election and, if won, runs the leader path (double
    /// check, fetch under breaker + time budget, write, publish) entirely
    /// inside the lease's scoped section so the extender and release are
    /// handled by `with_lease`. Returns `None` if the lease race was lost
    /// — the caller becomes a follower for this attempt.
    async fn lead<T, F, Fut>(&self, key: &str, fetcher: &F) -> Option<Result<T, PricingError>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, PricingError>> + Send,
    {
        let store = Arc::clone(&self.store);
        let fresh_ttl = self.config.fresh_ttl;
        let stale_ttl = self.config.stale_ttl;
        let fetch_budget = self.config.fetch_budget;

        let result = self
            .lease
            .with_lease(key, self.config.lease_ttl, || async {
                if let Ok(Some(bytes)) = store.get(key).await {
                    if let Ok(value) = serde_json::from_slice::<T>(&bytes) {
                        rendezvous::publish(&store, key, &bytes).await.ok();
                        return Ok(value);
                    }
                }

                if self.breaker.admit() == Admission::Reject {
                    rendezvous::publish(&store, key, &[]).await.ok();
                    return Err(PricingError::ServiceUnavailable.into());
                }

                match tokio::time::timeout(fetch_budget, fetcher()).await {
                    Ok(Ok(value)) => {
                        self.breaker.record_success();
                        let bytes = serde_json::to_vec(&value)
                            .map_err(|e| anyhow::anyhow!("serialize cached value: {e}"))?;
                        store.set(key, &bytes, fresh_ttl).await?;
                        store.set(&stale_key_for(key), &bytes, stale_ttl).await?;
                        rendezvous::publish(&store, key, &bytes).await.ok();
                        Ok(value)
                    }
                    Ok(Err(fetch_err)) => {
                        self.breaker.record_failure();
                        rendezvous::publish(&store, key, &[]).await.ok();
                        Err(fetch_err.into())
                    }
                    Err(_timed_out) => {
                        self.breaker.record_failure();
                        rendezvous::publish(&store, key, &[]).await.ok();
                        Err(PricingError::UpstreamError {
                            code: 504,
                            body: "fetch budget exceeded".to_string(),
                        }
                        .into())
                    }
                }
            })
            .await;

        match result {
            Ok(outcome) => Some(outcome.map_err(downcast_pricing_error)),
            Err(_lease_unavailable) => None,
        }
    }

    /// Follower path for one attempt: wait on a fresh rendezvous, and on
    /// timeout re-check cache then stale. Returns `Ok(None)` to signal
    /// "retry the whole fetch from the top" rather than propagating
    /// `WaitTimeout` directly, so the caller's retry loop can re-check
    /// for a cache hit first.
    async fn follow<T>(&self, key: &str) -> Result<Option<T>, PricingError>
    where
        T: DeserializeOwned,
    {
        let handle = Handle::create(Arc::clone(&self.store), key)
            .await
            .map_err(|e| PricingError::StoreError(e.to_string()))?;

        let outcome = handle
            .wait(self.config.follower_timeout)
            .await
            .map_err(|e| PricingError::StoreError(e.to_string()))?;

        match outcome {
            WaitOutcome::Delivered(bytes) if !bytes.is_empty() => {
                match serde_json::from_slice(&bytes) {
                    Ok(value) => Ok(Some(value)),
                    Err(_) => Ok(None),
                }
            }
            // Empty payload is the leader's failure signal (no cache
            // write occurred); fall through to the same re-check path as
            // a timeout.
            WaitOutcome::Delivered(_) | WaitOutcome::TimedOut => {
                if let Some(value) = self.read_fresh(key).await {
                    return Ok(Some(value));
                }
                if let Some(value) = self.read_stale(key).await {
                    self.stats.record_stale_served();
                    return Ok(Some(value));
                }
                Ok(None)
            }
        }
    }

    async fn stale_or_unavailable<T>(&self, key: &str) -> Result<T, PricingError>
    where
        T: DeserializeOwned,
    {
        if let Some(value) = self.read_stale(key).await {
            self.stats.record_stale_served();
            return Ok(value);
        }
        Err(PricingError::ServiceUnavailable)
    }

    async fn stale_or_wait_timeout<T>(&self, key: &str) -> Result<T, PricingError>
    where
        T: DeserializeOwned,
    {
        if let Some(value) = self.read_stale(key).await {
            self.stats.record_stale_served();
            return Ok(value);
        }
        Err(PricingError::WaitTimeout)
    }
}

fn downcast_pricing_error(err: anyhow::Error) -> PricingError {
    match err.downcast::<PricingError>() {
        Ok(pricing_err) => pricing_err,
        Err(other) => PricingError::StoreError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde::Deserialize;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Priced {
        price: f64,
    }

    fn test_config() -> PricingCacheConfig {
        PricingCacheConfig {
            fresh_ttl: Duration::from_secs(300),
            stale_ttl: Duration::from_secs(900),
            lease_ttl: Duration::from_millis(800),
            fetch_budget: Duration::from_secs(5),
            follower_timeout: Duration::from_millis(700),
            follower_max_retries: 2,
            breaker_failure_threshold: 5,
            breaker_cooldown: Duration::from_millis(200),
            ..PricingCacheConfig::default()
        }
    }

    fn cache() -> CoalescingCache {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        CoalescingCache::new(store, test_config())
    }

    #[tokio::test]
    async fn e1_cold_cache_single_caller() {
        let cache = cache();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);

        let result = cache
            .fetch("pricing:k", move || {
                let calls = Arc::clone(&calls2);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Priced { price: 150.00 })
                }
            })
            .await
            .unwrap();

        assert_eq!(result, Priced { price: 150.00 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn e2_hot_cache_serves_without_calling_fetcher() {
        let cache = cache();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls2 = Arc::clone(&calls);
            let result = cache
                .fetch("pricing:k", move || {
                    let calls = Arc::clone(&calls2);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Priced { price: 150.00 })
                    }
                })
                .await
                .unwrap();
            assert_eq!(result, Priced { price: 150.00 });
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn e3_coalescing_100_concurrent_callers() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .fetch("pricing:k", move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            Ok(Priced { price: 150.00 })
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result, Priced { price: 150.00 });
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn e4_breaker_opens_after_threshold_failures() {
        let cache = cache();

        for _ in 0..5 {
            let result: Result<Priced, PricingError> = cache
                .fetch("pricing:k", || async {
                    Err(PricingError::UpstreamError {
                        code: 500,
                        body: String::new(),
                    })
                })
                .await;
            assert!(result.is_err());
        }

        let sixth: Result<Priced, PricingError> = cache
            .fetch("pricing:k", || async {
                Err(PricingError::UpstreamError {
                    code: 500,
                    body: String::new(),
                })
            })
            .await;
        assert!(matches!(sixth, Err(PricingError::ServiceUnavailable)));
    }

    #[tokio::test]
    async fn e4_breaker_open_serves_stale_when_present() {
        let cache = cache();

        // Warm the stale entry with one success.
        cache
            .fetch("pricing:k", || async { Ok(Priced { price: 150.00 }) })
            .await
            .unwrap();

        // Force the fresh entry to expire while the stale copy survives,
        // then fail enough times to open the breaker.
        cache.store.del("pricing:k").await.unwrap();
        for _ in 0..5 {
            let _: Result<Priced, PricingError> = cache
                .fetch("pricing:k", || async {
                    Err(PricingError::UpstreamError {
                        code: 500,
                        body: String::new(),
                    })
                })
                .await;
        }

        let result = cache
            .fetch("pricing:k", || async { Ok(Priced { price: 999.00 }) })
            .await
            .unwrap();
        assert_eq!(result, Priced { price: 150.00 });
    }
}
