//! Per-request single-slot mailbox a follower blocks on until the leader
//! for its key delivers a result (spec §4.3).
//!
//! `W[K]` (the waiters registry) and `R[id]` (one rendezvous per blocked
//! follower) are both just keys in the shared store; this module only
//! adds the naming convention and the handle's cleanup discipline.

use crate::store::SharedStore;
use std::sync::Arc;
use std::time::Duration;

fn waiters_key(fingerprint_key: &str) -> String {
    format!("waiters:{fingerprint_key}")
}

fn rendezvous_key(id: &str) -> String {
    format!("rendezvous:{id}")
}

pub enum WaitOutcome {
    Delivered(Vec<u8>),
    TimedOut,
}

/// Owns one rendezvous slot. Registers itself into the key's waiters list
/// on creation; the leader pops waiter ids from that list during publish
/// and pushes the payload into each popped id's rendezvous slot.
pub struct Handle {
    store: Arc<dyn SharedStore>,
    id: String,
    consumed: bool,
}

impl Handle {
    /// Allocates a unique id, registers it into the waiters list for
    /// `fingerprint_key`, and returns a handle owning that rendezvous name.
    pub async fn create(store: Arc<dyn SharedStore>, fingerprint_key: &str) -> anyhow::Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        store.rpush(&waiters_key(fingerprint_key), id.as_bytes()).await?;
        Ok(Self {
            store,
            id,
            consumed: false,
        })
    }

    /// Blocks on this handle's rendezvous slot until a payload arrives or
    /// `timeout` elapses. Cleans up the slot on both paths.
    pub async fn wait(mut self, timeout: Duration) -> anyhow::Result<WaitOutcome> {
        let payload = self.store.blpop(&rendezvous_key(&self.id), timeout).await?;
        self.consumed = true;
        self.store.del(&rendezvous_key(&self.id)).await?;
        match payload {
            Some(bytes) => Ok(WaitOutcome::Delivered(bytes)),
            None => Ok(WaitOutcome::TimedOut),
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        // Backstop for cancellation: if `wait` was never called (e.g. the
        // caller's request context was cancelled first), the slot must
        // not be left dangling for the leader to push into forever.
        if !self.consumed {
            let store = Arc::clone(&self.store);
            let key = rendezvous_key(&self.id);
            tokio::spawn(async move {
                if let Err(err) = store.del(&key).await {
                    tracing::warn!(%key, error = %err, "failed to clean up abandoned rendezvous slot");
                }
            });
        }
    }
}

/// Drains the waiters list for `fingerprint_key`, pushing `payload` to
/// each waiter's rendezvous slot in arrival order. Used by the leader's
/// publish step. Deletes the waiters list at the end even if individual
/// pushes fail partway — stale rendezvous ids expire on their own via the
/// follower's own timeout-driven cleanup.
pub async fn publish(
    store: &Arc<dyn SharedStore>,
    fingerprint_key: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    let key = waiters_key(fingerprint_key);
    loop {
        match store.lpop(&key).await? {
            Some(waiter_id) => {
                let waiter_id = String::from_utf8_lossy(&waiter_id).into_owned();
                store.rpush(&rendezvous_key(&waiter_id), payload).await?;
            }
            None => break,
        }
    }
    store.del(&key).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn waiter_receives_published_payload() {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let handle = Handle::create(Arc::clone(&store), "pricing:k").await.unwrap();

        let publisher_store = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publish(&publisher_store, "pricing:k", b"payload").await.unwrap();
        });

        match handle.wait(Duration::from_secs(2)).await.unwrap() {
            WaitOutcome::Delivered(bytes) => assert_eq!(bytes, b"payload"),
            WaitOutcome::TimedOut => panic!("expected delivery"),
        }
    }

    #[tokio::test]
    async fn wait_times_out_when_nothing_is_published() {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let handle = Handle::create(Arc::clone(&store), "pricing:k").await.unwrap();

        match handle.wait(Duration::from_millis(30)).await.unwrap() {
            WaitOutcome::TimedOut => {}
            WaitOutcome::Delivered(_) => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn publish_delivers_to_every_waiter_exactly_once() {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let h1 = Handle::create(Arc::clone(&store), "pricing:k").await.unwrap();
        let h2 = Handle::create(Arc::clone(&store), "pricing:k").await.unwrap();
        let h3 = Handle::create(Arc::clone(&store), "pricing:k").await.unwrap();

        publish(&store, "pricing:k", b"value").await.unwrap();

        for handle in [h1, h2, h3] {
            match handle.wait(Duration::from_secs(1)).await.unwrap() {
                WaitOutcome::Delivered(bytes) => assert_eq!(bytes, b"value"),
                WaitOutcome::TimedOut => panic!("expected delivery"),
            }
        }
    }

    #[tokio::test]
    async fn publish_clears_the_waiters_list() {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let _handle = Handle::create(Arc::clone(&store), "pricing:k").await.unwrap();
        publish(&store, "pricing:k", b"value").await.unwrap();
        assert!(!store.exists(&waiters_key("pricing:k")).await.unwrap());
    }
}
