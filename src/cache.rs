//! Fingerprinted result cache with tiered expiry.
//!
//! [`ResultCache`] sits between the orchestrator and a [`CacheBackend`].
//! Entries are stored as JSON envelopes:
//!
//! ```text
//! ci:analysis:acme:3f9a…  →  {"data": {...}, "cached_at": "2026-…Z", "ttl": 86400}
//! ```
//!
//! | Tier | Key category | Holds | Default TTL |
//! |------|--------------|-------|-------------|
//! | [`TtlClass::Analysis`] | `analysis` | final [`AnalysisReport`] | 24h |
//! | [`TtlClass::Research`] | `research` | research stage text, shared across modes | 2h |
//! | [`TtlClass::Response`] | `response` | raw model reply, keyed by prompt and model | 24h |
//!
//! # Degradation
//!
//! The cache never fails a run. A missing backend, a backend error, an
//! undecodable entry or an unserializable payload are all logged and turned
//! into a miss (reads) or `false` (writes).
//!
//! # Expiry
//!
//! TTL is enforced twice: the backend is asked to expire the key, and `get`
//! re-checks `cached_at + ttl` against the injected [`Clock`]. The second
//! check is authoritative.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use intel_harness_core::clock::{Clock, SystemClock};
use intel_harness_core::fingerprint::{subject_slug, normalize_subject, Fingerprint};
use intel_harness_core::models::AnalysisReport;
use intel_harness_core::store::memory::InMemoryBackend;
use intel_harness_core::store::CacheBackend;

use crate::config::{CacheConfig, TtlConfig};
use crate::redis_store::RedisBackend;

/// Expiry tier, which also selects the key category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    Analysis,
    Research,
    Response,
}

impl TtlClass {
    pub fn category(&self) -> &'static str {
        match self {
            TtlClass::Analysis => "analysis",
            TtlClass::Research => "research",
            TtlClass::Response => "response",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    data: T,
    cached_at: DateTime<Utc>,
    ttl: u64,
}

/// Live-entry counts per category.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub backend: Option<String>,
    pub connected: bool,
    pub analysis_cached: usize,
    pub research_cached: usize,
    pub response_cached: usize,
    pub ttl: TtlConfig,
}

/// Shared, concurrency-safe result cache.
pub struct ResultCache {
    backend: Option<Arc<dyn CacheBackend>>,
    clock: Arc<dyn Clock>,
    prefix: String,
    ttl: TtlConfig,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, prefix: impl Into<String>, ttl: TtlConfig) -> Self {
        Self {
            backend: Some(backend),
            clock: Arc::new(SystemClock),
            prefix: prefix.into(),
            ttl,
        }
    }

    /// A cache that stores nothing and always misses.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            clock: Arc::new(SystemClock),
            prefix: "ci".to_string(),
            ttl: TtlConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn ttl_secs(&self, class: TtlClass) -> u64 {
        match class {
            TtlClass::Analysis => self.ttl.analysis_secs,
            TtlClass::Research => self.ttl.research_secs,
            TtlClass::Response => self.ttl.response_secs,
        }
    }

    fn key(&self, fingerprint: &Fingerprint, class: TtlClass) -> String {
        fingerprint.cache_key(&self.prefix, class.category())
    }

    /// Look up a payload. Misses on absence, expiry, decode failure, or
    /// backend error.
    pub async fn get<T: DeserializeOwned>(&self, fingerprint: &Fingerprint, class: TtlClass) -> Option<T> {
        let backend = self.backend.as_ref()?;
        let key = self.key(fingerprint, class);

        let raw = match backend.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache get failed, treating as miss");
                return None;
            }
        };

        let envelope: Envelope<T> = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable cache entry, discarding");
                self.discard(backend.as_ref(), key).await;
                return None;
            }
        };

        let ttl = i64::try_from(envelope.ttl).unwrap_or(i64::MAX);
        let age = (self.clock.now() - envelope.cached_at).num_seconds();
        if age >= ttl {
            debug!(key = %key, age, ttl, "cache entry expired");
            self.discard(backend.as_ref(), key).await;
            return None;
        }

        info!(key = %key, "cache hit");
        Some(envelope.data)
    }

    async fn discard(&self, backend: &dyn CacheBackend, key: String) {
        if let Err(e) = backend.del(&[key]).await {
            debug!(error = %e, "failed to discard stale cache entry");
        }
    }

    /// Store a payload under the tier's TTL, replacing any prior entry.
    /// Returns `false` when nothing was written.
    pub async fn set<T: Serialize>(&self, fingerprint: &Fingerprint, payload: &T, class: TtlClass) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        let key = self.key(fingerprint, class);
        let ttl = self.ttl_secs(class);
        let envelope = Envelope {
            data: payload,
            cached_at: self.clock.now(),
            ttl,
        };
        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "cache payload not serializable, skipping store");
                return false;
            }
        };
        match backend.set_ex(&key, &raw, ttl).await {
            Ok(()) => {
                info!(key = %key, ttl, "cached result");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache set failed");
                false
            }
        }
    }

    pub async fn delete(&self, fingerprint: &Fingerprint, class: TtlClass) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        match backend.del(&[self.key(fingerprint, class)]).await {
            Ok(n) => n > 0,
            Err(e) => {
                warn!(error = %e, "cache delete failed");
                false
            }
        }
    }

    /// Delete every key matching `{prefix}:{pattern}`. Returns the number
    /// of keys removed.
    pub async fn invalidate_prefix(&self, pattern: &str) -> usize {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };
        let full = format!("{}:{}", self.prefix, pattern);
        let keys = match backend.keys(&full).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern = %full, error = %e, "cache key scan failed");
                return 0;
            }
        };
        if keys.is_empty() {
            return 0;
        }
        match backend.del(&keys).await {
            Ok(n) => {
                info!(pattern = %full, removed = n, "invalidated cache entries");
                n
            }
            Err(e) => {
                warn!(pattern = %full, error = %e, "cache invalidation failed");
                0
            }
        }
    }

    /// Drop every cached entry, in any category, for one subject.
    pub async fn clear_subject(&self, subject: &str) -> usize {
        let normalized = normalize_subject(subject);
        if normalized.is_empty() {
            return 0;
        }
        self.invalidate_prefix(&format!("*:{}:*", subject_slug(&normalized)))
            .await
    }

    async fn count(&self, backend: &dyn CacheBackend, class: TtlClass) -> usize {
        let pattern = format!("{}:{}:*", self.prefix, class.category());
        match backend.keys(&pattern).await {
            Ok(keys) => keys.len(),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "cache stats scan failed");
                0
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let Some(backend) = self.backend.as_ref() else {
            return CacheStats {
                enabled: false,
                backend: None,
                connected: false,
                analysis_cached: 0,
                research_cached: 0,
                response_cached: 0,
                ttl: self.ttl.clone(),
            };
        };
        CacheStats {
            enabled: true,
            backend: Some(backend.name().to_string()),
            connected: backend.ping().await.is_ok(),
            analysis_cached: self.count(backend.as_ref(), TtlClass::Analysis).await,
            research_cached: self.count(backend.as_ref(), TtlClass::Research).await,
            response_cached: self.count(backend.as_ref(), TtlClass::Response).await,
            ttl: self.ttl.clone(),
        }
    }

    pub async fn ping(&self) -> bool {
        match self.backend.as_ref() {
            Some(backend) => backend.ping().await.is_ok(),
            None => false,
        }
    }

    pub async fn get_analysis(&self, fingerprint: &Fingerprint) -> Option<AnalysisReport> {
        self.get(fingerprint, TtlClass::Analysis).await
    }

    pub async fn set_analysis(&self, fingerprint: &Fingerprint, report: &AnalysisReport) -> bool {
        self.set(fingerprint, report, TtlClass::Analysis).await
    }

    pub async fn get_research(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.get(fingerprint, TtlClass::Research).await
    }

    pub async fn set_research(&self, fingerprint: &Fingerprint, findings: &str) -> bool {
        self.set(fingerprint, &findings, TtlClass::Research).await
    }

    pub async fn get_response(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.get(fingerprint, TtlClass::Response).await
    }

    pub async fn set_response(&self, fingerprint: &Fingerprint, text: &str) -> bool {
        self.set(fingerprint, &text, TtlClass::Response).await
    }
}

/// Build the cache described by `[cache]`.
///
/// A Redis backend that cannot be reached at startup disables the cache
/// instead of aborting.
pub async fn build_cache(config: &CacheConfig) -> ResultCache {
    if !config.enabled {
        info!("result cache disabled by configuration");
        return ResultCache::disabled();
    }

    let backend: Arc<dyn CacheBackend> = match config.backend.as_str() {
        "redis" => {
            let Some(url) = config.redis_url.as_deref() else {
                warn!("cache.backend is redis but no redis_url set, cache disabled");
                return ResultCache::disabled();
            };
            let timeout = Duration::from_secs(config.connect_timeout_secs);
            match RedisBackend::connect(url, timeout).await {
                Ok(backend) => {
                    info!(url = %url, "redis cache connected");
                    Arc::new(backend)
                }
                Err(e) => {
                    warn!(url = %url, error = %format!("{e:#}"), "redis unavailable, cache disabled");
                    return ResultCache::disabled();
                }
            }
        }
        _ => Arc::new(InMemoryBackend::new(config.max_entries)),
    };

    ResultCache::new(backend, config.key_prefix.clone(), config.ttl.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use intel_harness_core::clock::ManualClock;
    use intel_harness_core::fingerprint::{AnalysisRequest, FingerprintBuilder};

    fn fp(subject: &str) -> Fingerprint {
        FingerprintBuilder::from_request(&AnalysisRequest::new(subject))
            .unwrap()
            .build()
            .unwrap()
    }

    fn cache_with(ttl: TtlConfig) -> (ResultCache, Arc<InMemoryBackend>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let backend = Arc::new(InMemoryBackend::with_clock(100, clock.clone()));
        let cache = ResultCache::new(backend.clone(), "ci", ttl).with_clock(clock.clone());
        (cache, backend, clock)
    }

    #[tokio::test]
    async fn read_your_write() {
        let (cache, _, _) = cache_with(TtlConfig::default());
        let f = fp("Acme");
        assert!(cache.set(&f, &"payload".to_string(), TtlClass::Research).await);
        let got: Option<String> = cache.get(&f, TtlClass::Research).await;
        assert_eq!(got.as_deref(), Some("payload"));
        // Tiers are separate keys.
        assert!(cache.get::<String>(&f, TtlClass::Analysis).await.is_none());
    }

    #[tokio::test]
    async fn overwrite_replaces_payload() {
        let (cache, _, _) = cache_with(TtlConfig::default());
        let f = fp("Acme");
        cache.set_research(&f, "v1").await;
        cache.set_research(&f, "v2").await;
        assert_eq!(cache.get_research(&f).await.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn expires_by_envelope_even_if_backend_keeps_entry() {
        let (cache, backend, clock) = cache_with(TtlConfig {
            analysis_secs: 2,
            research_secs: 2,
            ..TtlConfig::default()
        });
        let f = fp("Acme");
        // Write a long-lived raw entry whose envelope says ttl=2.
        let raw = serde_json::json!({"data": "old", "cached_at": clock.now(), "ttl": 2}).to_string();
        backend
            .set_ex(&f.cache_key("ci", "research"), &raw, 3600)
            .await
            .unwrap();
        clock.advance_secs(3);
        assert!(cache.get_research(&f).await.is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn undecodable_entries_are_misses() {
        let (cache, backend, _) = cache_with(TtlConfig::default());
        let f = fp("Acme");
        backend
            .set_ex(&f.cache_key("ci", "analysis"), "not json", 60)
            .await
            .unwrap();
        assert!(cache.get_analysis(&f).await.is_none());
    }

    #[tokio::test]
    async fn offline_backend_degrades() {
        let (cache, backend, _) = cache_with(TtlConfig::default());
        let f = fp("Acme");
        backend.set_offline(true);
        assert!(!cache.set_research(&f, "x").await);
        assert!(cache.get_research(&f).await.is_none());
        assert_eq!(cache.clear_subject("Acme").await, 0);
        assert!(!cache.ping().await);
        let stats = cache.stats().await;
        assert!(stats.enabled);
        assert!(!stats.connected);
    }

    #[tokio::test]
    async fn clear_subject_only_touches_that_subject() {
        let (cache, _, _) = cache_with(TtlConfig::default());
        let acme = fp("Acme Corp");
        let globex = fp("Globex");
        cache.set_research(&acme, "a").await;
        cache.set(&acme, &"r".to_string(), TtlClass::Analysis).await;
        cache.set_research(&globex, "g").await;

        assert_eq!(cache.clear_subject("  ACME   corp ").await, 2);
        assert!(cache.get_research(&acme).await.is_none());
        assert_eq!(cache.get_research(&globex).await.as_deref(), Some("g"));
    }

    #[tokio::test]
    async fn stats_count_per_category() {
        let (cache, _, _) = cache_with(TtlConfig::default());
        cache.set_research(&fp("a"), "1").await;
        cache.set_research(&fp("b"), "2").await;
        cache.set(&fp("a"), &"r".to_string(), TtlClass::Analysis).await;
        cache.set_response(&fp("a"), "reply").await;
        let stats = cache.stats().await;
        assert!(stats.connected);
        assert_eq!(stats.backend.as_deref(), Some("memory"));
        assert_eq!(stats.research_cached, 2);
        assert_eq!(stats.analysis_cached, 1);
        assert_eq!(stats.response_cached, 1);
    }

    #[tokio::test]
    async fn response_tier_has_its_own_ttl() {
        let (cache, _, clock) = cache_with(TtlConfig {
            response_secs: 10,
            ..TtlConfig::default()
        });
        let f = fp("Acme");
        assert!(cache.get_response(&f).await.is_none());
        assert!(cache.set_response(&f, "reply").await);
        assert_eq!(cache.get_response(&f).await.as_deref(), Some("reply"));
        assert!(cache.get_research(&f).await.is_none());

        clock.advance_secs(9);
        assert!(cache.get_response(&f).await.is_some());
        clock.advance_secs(1);
        assert!(cache.get_response(&f).await.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_is_a_no_op() {
        let cache = ResultCache::disabled();
        let f = fp("Acme");
        assert!(!cache.set_research(&f, "x").await);
        assert!(cache.get_research(&f).await.is_none());
        assert!(!cache.stats().await.enabled);
    }

    #[tokio::test]
    async fn unreachable_redis_disables_cache() {
        let config = CacheConfig {
            backend: "redis".into(),
            redis_url: Some("redis://127.0.0.1:1".into()),
            connect_timeout_secs: 1,
            ..CacheConfig::default()
        };
        let cache = build_cache(&config).await;
        assert!(!cache.is_enabled());
    }
}
