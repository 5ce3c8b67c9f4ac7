//! Redis-backed [`SharedStore`], the mode used when multiple service
//! instances share one cache. Compare-and-delete and compare-and-expire
//! are not native Redis commands; both are implemented as small Lua
//! scripts so the read-compare-write stays atomic (the same approach used
//! by Redlock-style distributed locks).
//!
//! `MultiplexedConnection` pipelines commands over a single TCP connection
//! and is cheap to clone, so each call below clones it rather than taking
//! a lock — a blocking `blpop` from one follower must never stall a cache
//! `get` from another.

use super::SharedStore;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::time::Duration;

pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        tracing::info!("Connected to Redis shared store");
        Ok(Self { conn })
    }
}

const CMPDEL_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
";

const CMPEXPIRE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
";

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn setnx(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn cmpdel(&self, key: &str, expected: &[u8]) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(CMPDEL_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn cmpexpire(&self, key: &str, expected: &[u8], ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let updated: i64 = redis::Script::new(CMPEXPIRE_SCRIPT)
            .key(key)
            .arg(expected)
            .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn rpop(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.rpop(key, None).await?)
    }

    async fn lpop(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.lpop(key, None).await?)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let result: Option<(String, Vec<u8>)> = conn.blpop(key, timeout.as_secs_f64()).await?;
        Ok(result.map(|(_, payload)| payload))
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }
}
