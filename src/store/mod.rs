//! Shared key/value store abstraction (spec §6).
//!
//! The core only needs this narrow command surface; the wire protocol to
//! the actual backing store is not part of the contract. Two
//! implementations are provided: [`redis_store::RedisStore`] for
//! multi-instance deployments and [`memory::InMemoryStore`] for tests and
//! single-instance use.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::time::Duration;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()>;
    /// Atomic set-if-absent with expiry. Returns whether this call set it.
    async fn setnx(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<bool>;
    /// Delete `key` only if its current value equals `expected`.
    async fn cmpdel(&self, key: &str, expected: &[u8]) -> anyhow::Result<bool>;
    /// Refresh `key`'s expiry only if its current value equals `expected`.
    async fn cmpexpire(&self, key: &str, expected: &[u8], ttl: Duration) -> anyhow::Result<bool>;
    async fn del(&self, key: &str) -> anyhow::Result<()>;
    async fn rpush(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    async fn lpush(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    async fn rpop(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn lpop(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    /// Blocking pop from the left; returns `None` on timeout.
    async fn blpop(&self, key: &str, timeout: Duration) -> anyhow::Result<Option<Vec<u8>>>;
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
}
