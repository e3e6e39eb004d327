//! In-process [`CacheBackend`] for single-node deployments and tests.
//!
//! Entries live in a `HashMap` behind a `std::sync::RwLock`. Expiry is
//! evaluated lazily against an injected [`Clock`], so tests can move time
//! forward without sleeping. When `max_entries` is reached, expired entries
//! are dropped first, then the entry closest to expiry is evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use globset::Glob;

use crate::clock::{Clock, SystemClock};

use super::CacheBackend;

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Map-backed cache with lazy expiry.
pub struct InMemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    offline: AtomicBool,
}

impl InMemoryBackend {
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            max_entries: max_entries.max(1),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every operation fail, simulating an unreachable backend.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored entries, including any not yet lazily expired.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("memory backend is offline");
        }
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(10_000)
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("cache lock poisoned")
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_online()?;
        let now = self.clock.now();
        {
            let entries = self.entries.read().map_err(poisoned)?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.check_online()?;
        let now = self.clock.now();
        let expires_at = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut entries = self.entries.write().map_err(poisoned)?;

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.max_entries {
                let victim = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        self.check_online()?;
        let mut entries = self.entries.write().map_err(poisoned)?;
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_online()?;
        let matcher = Glob::new(pattern)?.compile_matcher();
        let now = self.clock.now();
        let entries = self.entries.read().map_err(poisoned)?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| e.expires_at > now && matcher.is_match(k.as_str()))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn backend(max: usize) -> (InMemoryBackend, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (InMemoryBackend::with_clock(max, clock.clone()), clock)
    }

    #[tokio::test]
    async fn set_then_get() {
        let (b, _) = backend(10);
        b.set_ex("ci:analysis:acme:1", "v", 60).await.unwrap();
        assert_eq!(b.get("ci:analysis:acme:1").await.unwrap().as_deref(), Some("v"));
        assert_eq!(b.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire_with_clock() {
        let (b, clock) = backend(10);
        b.set_ex("k", "v", 2).await.unwrap();
        clock.advance_secs(1);
        assert!(b.get("k").await.unwrap().is_some());
        clock.advance_secs(2);
        assert!(b.get("k").await.unwrap().is_none());
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn glob_keys_and_delete() {
        let (b, _) = backend(10);
        b.set_ex("ci:analysis:acme:1", "a", 60).await.unwrap();
        b.set_ex("ci:research:acme:2", "b", 60).await.unwrap();
        b.set_ex("ci:analysis:globex:3", "c", 60).await.unwrap();

        let acme = b.keys("ci:*:acme:*").await.unwrap();
        assert_eq!(acme, vec!["ci:analysis:acme:1", "ci:research:acme:2"]);
        assert_eq!(b.keys("ci:analysis:*").await.unwrap().len(), 2);

        assert_eq!(b.del(&acme).await.unwrap(), 2);
        assert_eq!(b.del(&acme).await.unwrap(), 0);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn evicts_soonest_expiring_when_full() {
        let (b, _) = backend(2);
        b.set_ex("short", "1", 10).await.unwrap();
        b.set_ex("long", "2", 1000).await.unwrap();
        b.set_ex("new", "3", 500).await.unwrap();
        assert!(b.get("short").await.unwrap().is_none());
        assert!(b.get("long").await.unwrap().is_some());
        assert!(b.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn offline_backend_errors() {
        let (b, _) = backend(2);
        b.set_offline(true);
        assert!(b.ping().await.is_err());
        assert!(b.get("k").await.is_err());
        assert!(b.set_ex("k", "v", 1).await.is_err());
        b.set_offline(false);
        assert!(b.ping().await.is_ok());
    }
}
