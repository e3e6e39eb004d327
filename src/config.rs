//! Configuration parsing and validation.
//!
//! Intel Harness is configured via a TOML file (default:
//! `./config/intel.toml`). Every section is optional and falls back to the
//! defaults below, so an empty file is a valid single-node configuration
//! with an in-memory cache and the capability disabled.
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [cache]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//!
//! [cache.ttl]
//! analysis_secs = 86400
//! research_secs = 7200
//!
//! [sessions]
//! heartbeat_secs = 1
//! grace_secs = 300
//!
//! [capability]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```
//!
//! Validation failures are reported as [`HarnessError::Configuration`] and
//! abort startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use intel_harness_core::error::HarnessError;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub capability: CapabilityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `memory` or `redis`.
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default)]
    pub ttl: TtlConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_cache_backend(),
            redis_url: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            key_prefix: default_key_prefix(),
            max_entries: default_max_entries(),
            ttl: TtlConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_cache_backend() -> String {
    "memory".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_key_prefix() -> String {
    "ci".to_string()
}
fn default_max_entries() -> usize {
    10_000
}

/// Expiry tiers. Final reports are expensive and stable; research goes
/// stale faster. `response_secs` covers raw model replies keyed by prompt.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TtlConfig {
    #[serde(default = "default_analysis_ttl")]
    pub analysis_secs: u64,
    #[serde(default = "default_research_ttl")]
    pub research_secs: u64,
    #[serde(default = "default_response_ttl")]
    pub response_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            analysis_secs: default_analysis_ttl(),
            research_secs: default_research_ttl(),
            response_secs: default_response_ttl(),
        }
    }
}

fn default_analysis_ttl() -> u64 {
    86_400
}
fn default_research_ttl() -> u64 {
    7_200
}
fn default_response_ttl() -> u64 {
    86_400
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            grace_secs: default_grace_secs(),
            channel_capacity: default_channel_capacity(),
            max_lifetime_secs: default_max_lifetime_secs(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

fn default_heartbeat_secs() -> u64 {
    1
}
fn default_grace_secs() -> u64 {
    300
}
fn default_channel_capacity() -> usize {
    256
}
fn default_max_lifetime_secs() -> u64 {
    1_800
}
fn default_purge_interval_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CapabilityConfig {
    /// `openai`, `ollama`, or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Overrides the per-mode token budget when set.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_tokens: None,
            temperature: default_temperature(),
        }
    }
}

impl CapabilityConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    HarnessError::Configuration(message.into()).into()
}

/// Read, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config TOML.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Upper bound for session grace and lifetime (30 days).
pub const MAX_SESSION_SECS: u64 = 30 * 24 * 3600;

fn validate(config: &Config) -> Result<()> {
    match config.cache.backend.as_str() {
        "memory" => {}
        "redis" => {
            if config.cache.enabled && config.cache.redis_url.is_none() {
                return Err(invalid("cache.redis_url must be set when backend is 'redis'"));
            }
        }
        other => {
            return Err(invalid(format!(
                "Unknown cache backend: '{}'. Must be memory or redis.",
                other
            )))
        }
    }
    if config.cache.key_prefix.trim().is_empty() {
        return Err(invalid("cache.key_prefix must not be empty"));
    }
    let ttl = &config.cache.ttl;
    if ttl.analysis_secs == 0 || ttl.research_secs == 0 || ttl.response_secs == 0 {
        return Err(invalid("cache.ttl values must be > 0"));
    }

    let s = &config.sessions;
    if s.heartbeat_secs == 0 {
        return Err(invalid("sessions.heartbeat_secs must be > 0"));
    }
    if s.channel_capacity == 0 {
        return Err(invalid("sessions.channel_capacity must be > 0"));
    }
    if s.purge_interval_secs == 0 {
        return Err(invalid("sessions.purge_interval_secs must be > 0"));
    }
    if s.max_lifetime_secs == 0 {
        return Err(invalid("sessions.max_lifetime_secs must be > 0"));
    }
    if s.grace_secs > MAX_SESSION_SECS || s.max_lifetime_secs > MAX_SESSION_SECS {
        return Err(invalid(format!(
            "sessions.grace_secs and sessions.max_lifetime_secs must be <= {}",
            MAX_SESSION_SECS
        )));
    }

    match config.capability.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => {
            return Err(invalid(format!(
                "Unknown capability provider: '{}'. Must be disabled, openai, or ollama.",
                other
            )))
        }
    }
    if config.capability.timeout_secs == 0 {
        return Err(invalid("capability.timeout_secs must be > 0"));
    }

    Ok(())
}
