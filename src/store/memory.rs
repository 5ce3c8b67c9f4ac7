//! In-process [`SharedStore`] backed by `tokio::sync::Mutex`-guarded maps.
//!
//! Used by every unit/integration test in this crate, and usable as a
//! single-instance deployment mode when a real Redis is not available.
//! Implements the exact command surface in spec §6, including `blpop`'s
//! blocking semantics via a [`tokio::sync::Notify`] per list key.

use super::SharedStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

struct ScalarEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl ScalarEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    scalars: Mutex<HashMap<String, ScalarEntry>>,
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    notifiers: Mutex<HashMap<String, Arc<Notify>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn notifier_for(&self, key: &str) -> Arc<Notify> {
        let mut notifiers = self.notifiers.lock().await;
        notifiers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut scalars = self.scalars.lock().await;
        match scalars.get(key) {
            Some(entry) if entry.is_expired() => {
                scalars.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()> {
        self.scalars.lock().await.insert(
            key.to_string(),
            ScalarEntry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn setnx(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<bool> {
        let mut scalars = self.scalars.lock().await;
        let occupied = matches!(scalars.get(key), Some(entry) if !entry.is_expired());
        if occupied {
            return Ok(false);
        }
        scalars.insert(
            key.to_string(),
            ScalarEntry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn cmpdel(&self, key: &str, expected: &[u8]) -> anyhow::Result<bool> {
        let mut scalars = self.scalars.lock().await;
        match scalars.get(key) {
            Some(entry) if !entry.is_expired() && entry.value == expected => {
                scalars.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cmpexpire(&self, key: &str, expected: &[u8], ttl: Duration) -> anyhow::Result<bool> {
        let mut scalars = self.scalars.lock().await;
        match scalars.get_mut(key) {
            Some(entry) if !entry.is_expired() && entry.value == expected => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.scalars.lock().await.remove(key);
        self.lists.lock().await.remove(key);
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_vec());
        self.notifier_for(key).await.notify_waiters();
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_vec());
        self.notifier_for(key).await.notify_waiters();
        Ok(())
    }

    async fn rpop(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .lists
            .lock()
            .await
            .get_mut(key)
            .and_then(VecDeque::pop_back))
    }

    async fn lpop(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .lists
            .lock()
            .await
            .get_mut(key)
            .and_then(VecDeque::pop_front))
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> anyhow::Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.lpop(key).await? {
                return Ok(Some(value));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let notify = self.notifier_for(key).await;
            // A push between the lpop above and this wait would be missed
            // without re-checking after the timed wait resolves; the loop
            // re-attempts lpop on every wakeup (spurious or real) so no
            // push is lost.
            let _ = tokio::time::timeout(remaining, notify.notified()).await;
        }
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        if let Some(entry) = self.scalars.lock().await.get(key) {
            if !entry.is_expired() {
                return Ok(true);
            }
        }
        Ok(self
            .lists
            .lock()
            .await
            .get(key)
            .is_some_and(|list| !list.is_empty()))
    }
}
