//! Cache backend abstraction.
//!
//! The [`CacheBackend`] trait is the narrow key/value interface the result
//! cache talks to. Values are opaque strings (the cache stores JSON
//! envelopes); expiry is requested per key with `set_ex`.
//!
//! Implementations must be `Send + Sync` and safe under concurrent access
//! from many pipeline runs. Each operation is atomic per key.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get`](CacheBackend::get) | Read a value, `None` if absent or expired |
//! | [`set_ex`](CacheBackend::set_ex) | Write a value with a TTL in seconds |
//! | [`del`](CacheBackend::del) | Delete keys, returning how many existed |
//! | [`keys`](CacheBackend::keys) | List keys matching a glob pattern |
//! | [`ping`](CacheBackend::ping) | Liveness check |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

/// Abstract key/value store with per-key expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name for logs and stats (`memory`, `redis`).
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    async fn del(&self, keys: &[String]) -> Result<usize>;

    /// Keys matching a glob pattern (`*` and `?` wildcards).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn ping(&self) -> Result<()>;
}
