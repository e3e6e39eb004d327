//! Redis [`CacheBackend`] for deployments with more than one server process.
//!
//! Uses a multiplexed [`ConnectionManager`], which reconnects on its own
//! after a dropped connection. Expiry is delegated to Redis via `SET EX`;
//! the result cache still re-checks the envelope timestamp on read.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use intel_harness_core::store::CacheBackend;

pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Open a connection and verify it with `PING`, giving up after
    /// `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).with_context(|| format!("invalid redis url: {}", url))?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .with_context(|| format!("timed out connecting to redis after {:?}", timeout))?
            .context("failed to connect to redis")?;
        let backend = Self { conn };
        tokio::time::timeout(timeout, backend.ping())
            .await
            .context("timed out waiting for redis PING")??;
        Ok(backend)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: usize = conn.del(keys.to_vec()).await?;
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys: Vec<String> = conn.keys(pattern).await?;
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
