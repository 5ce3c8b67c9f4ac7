//! Named, owned, auto-extending mutual exclusion over the shared store
//! (spec §4.2). One lease exists per key at a time; ownership is a fresh
//! random token per acquisition attempt so release can never free a
//! successor's lease.

use crate::store::SharedStore;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct DistributedLease {
    store: Arc<dyn SharedStore>,
}

/// Returned when `try_acquire` loses the race; callers become followers.
#[derive(Debug)]
pub struct LeaseUnavailable;

impl std::fmt::Display for LeaseUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lease unavailable")
    }
}

impl std::error::Error for LeaseUnavailable {}

/// Holds a lease and its owner token for the life of a critical section.
/// Dropping this without calling [`LeaseGuard::release`] leaves the lease
/// to expire naturally; callers should always release explicitly via
/// [`DistributedLease::with_lease`].
pub struct LeaseGuard {
    name: String,
    owner: String,
}

impl DistributedLease {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    fn lock_key(name: &str) -> String {
        format!("lock:{name}")
    }

    pub async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> anyhow::Result<Option<LeaseGuard>> {
        let owner = Uuid::new_v4().to_string();
        let won = self
            .store
            .setnx(&Self::lock_key(name), owner.as_bytes(), ttl)
            .await?;
        if won {
            Ok(Some(LeaseGuard {
                name: name.to_string(),
                owner,
            }))
        } else {
            Ok(None)
        }
    }

    async fn extend(&self, guard: &LeaseGuard, ttl: Duration) -> anyhow::Result<bool> {
        self.store
            .cmpexpire(&Self::lock_key(&guard.name), guard.owner.as_bytes(), ttl)
            .await
    }

    async fn release(&self, guard: &LeaseGuard) -> anyhow::Result<bool> {
        self.store
            .cmpdel(&Self::lock_key(&guard.name), guard.owner.as_bytes())
            .await
    }

    /// Scoped acquisition. Attempts to acquire once (no retry at this
    /// layer — a losing caller becomes a follower, not a retrier of the
    /// lease itself); on success spawns a background extender refreshing
    /// every `ttl/5`, runs `body`, then stops the extender and releases
    /// the lease via compare-and-delete on every exit path, including
    /// when `body` returns an error.
    pub async fn with_lease<F, Fut, T>(
        &self,
        name: &str,
        ttl: Duration,
        body: F,
    ) -> anyhow::Result<Result<T, anyhow::Error>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
    {
        let Some(guard) = self.try_acquire(name, ttl).await? else {
            return Err(LeaseUnavailable.into());
        };

        let extend_interval = ttl / 5;
        let extender_store = Arc::clone(&self.store);
        let extender_name = guard.name.clone();
        let extender_owner = guard.owner.clone();
        let extender = tokio::spawn(async move {
            let lease = DistributedLease::new(extender_store);
            let guard = LeaseGuard {
                name: extender_name,
                owner: extender_owner,
            };
            loop {
                tokio::time::sleep(extend_interval).await;
                match lease.extend(&guard, ttl).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(name = %guard.name, "lease extend found no matching owner, stopping extender");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(name = %guard.name, error = %err, "lease extend failed, will retry next interval");
                    }
                }
            }
        });

        let result = body().await;

        extender.abort();

        if !self.release(&guard).await? {
            tracing::info!(name = %guard.name, "lease release was a no-op (already expired or reclaimed)");
        }

        Ok(result)
    }
}
