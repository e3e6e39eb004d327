//! External language-model capability used by every pipeline stage.
//!
//! Defines the [`Capability`] trait and its providers:
//! - **[`OpenAiCapability`]**: any OpenAI-compatible `POST /chat/completions` endpoint.
//! - **[`OllamaCapability`]**: a local Ollama instance's `POST /api/chat`.
//! - **[`DisabledCapability`]**: fails every call; used when no provider is configured.
//!
//! [`CachedCapability`] wraps any provider with the result cache's
//! `response` tier, so an identical prompt to the same model is answered
//! from cache.
//!
//! # Retry Strategy
//!
//! HTTP providers retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! A call that still fails after retries becomes that stage's error. The
//! pipeline itself never retries a stage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use intel_harness_core::error::HarnessError;
use intel_harness_core::fingerprint::response_fingerprint;
use intel_harness_core::models::StageName;

use crate::cache::ResultCache;
use crate::config::CapabilityConfig;

/// One prompt sent on behalf of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityCall {
    /// Subject the call is about. Not sent; files cached replies.
    pub subject: String,
    pub stage: StageName,
    pub system_prompt: String,
    pub prompt: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CapabilityReply {
    pub text: String,
    pub model: String,
}

/// A text-generation backend.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Provider name, reported as the `tool_name` of `tool_call` events.
    fn name(&self) -> &str;

    /// Model the provider sends calls to.
    fn model(&self) -> &str {
        self.name()
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<CapabilityReply>;
}

/// Instantiate the provider named in `[capability]`.
///
/// # Errors
///
/// [`HarnessError::Configuration`] when the API key variable is unset for
/// `openai` or the provider name is unknown.
pub fn create_capability(config: &CapabilityConfig) -> Result<Arc<dyn Capability>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCapability)),
        "openai" => Ok(Arc::new(OpenAiCapability::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaCapability::new(config)?)),
        other => Err(HarnessError::Configuration(format!("Unknown capability provider: {}", other)).into()),
    }
}

// ============ Disabled ============

pub struct DisabledCapability;

#[async_trait]
impl Capability for DisabledCapability {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn invoke(&self, _call: &CapabilityCall) -> Result<CapabilityReply> {
        bail!("no capability provider configured (set [capability].provider)")
    }
}

// ============ Shared HTTP retry ============

struct HttpSettings {
    client: reqwest::Client,
    model: String,
    temperature: f32,
    max_tokens_override: Option<u32>,
    max_retries: u32,
}

impl HttpSettings {
    fn new(config: &CapabilityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens_override: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn max_tokens(&self, call: &CapabilityCall) -> u32 {
        self.max_tokens_override.unwrap_or(call.max_tokens)
    }
}

/// POST `body` to `url`, retrying 429/5xx and network errors.
async fn post_json_with_retry(
    settings: &HttpSettings,
    label: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(provider = label, attempt, ?delay, "retrying capability call");
            tokio::time::sleep(delay).await;
        }

        let mut request = settings
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(provider = label, %status, attempt, "transient capability error");
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                warn!(provider = label, error = %e, attempt, "capability connection error");
                last_err = Some(anyhow!("{} connection error ({}): {}", label, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} call failed after retries", label)))
}

fn messages(call: &CapabilityCall) -> serde_json::Value {
    serde_json::json!([
        {"role": "system", "content": call.system_prompt},
        {"role": "user", "content": call.prompt},
    ])
}

// ============ OpenAI-compatible ============

/// Chat completions against `{base_url}/chat/completions`
/// (default `https://api.openai.com/v1`).
pub struct OpenAiCapability {
    settings: HttpSettings,
    base_url: String,
    api_key: String,
}

impl OpenAiCapability {
    pub fn new(config: &CapabilityConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            HarnessError::Configuration(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        Ok(Self {
            settings: HttpSettings::new(config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Capability for OpenAiCapability {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<CapabilityReply> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "messages": messages(call),
            "max_tokens": self.settings.max_tokens(call),
            "temperature": self.settings.temperature,
        });
        let url = format!("{}/chat/completions", self.base_url);
        let json = post_json_with_retry(&self.settings, "OpenAI", &url, Some(&self.api_key), &body).await?;
        parse_openai_response(&json, &self.settings.model)
    }
}

/// Extract `choices[0].message.content`.
fn parse_openai_response(json: &serde_json::Value, default_model: &str) -> Result<CapabilityReply> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))?;
    if text.trim().is_empty() {
        bail!("OpenAI returned an empty completion");
    }
    Ok(CapabilityReply {
        text: text.to_string(),
        model: json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(default_model)
            .to_string(),
    })
}

// ============ Ollama ============

/// Chat against a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaCapability {
    settings: HttpSettings,
    base_url: String,
}

impl OllamaCapability {
    pub fn new(config: &CapabilityConfig) -> Result<Self> {
        Ok(Self {
            settings: HttpSettings::new(config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl Capability for OllamaCapability {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<CapabilityReply> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "messages": messages(call),
            "stream": false,
            "options": {
                "temperature": self.settings.temperature,
                "num_predict": self.settings.max_tokens(call),
            },
        });
        let url = format!("{}/api/chat", self.base_url);
        let json = post_json_with_retry(&self.settings, "Ollama", &url, None, &body).await?;
        parse_ollama_response(&json, &self.settings.model)
    }
}

fn parse_ollama_response(json: &serde_json::Value, default_model: &str) -> Result<CapabilityReply> {
    let text = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))?;
    if text.trim().is_empty() {
        bail!("Ollama returned an empty completion");
    }
    Ok(CapabilityReply {
        text: text.to_string(),
        model: json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(default_model)
            .to_string(),
    })
}

// ============ Response cache ============

/// Answers repeated calls from the `response` cache tier. Only successful
/// replies are stored.
pub struct CachedCapability {
    inner: Arc<dyn Capability>,
    cache: Arc<ResultCache>,
}

impl CachedCapability {
    pub fn new(inner: Arc<dyn Capability>, cache: Arc<ResultCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Capability for CachedCapability {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<CapabilityReply> {
        let fingerprint = match response_fingerprint(
            &call.subject,
            call.stage,
            &call.system_prompt,
            &call.prompt,
            self.inner.model(),
            call.max_tokens,
        ) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!(error = %e, "cannot fingerprint call, bypassing response cache");
                return self.inner.invoke(call).await;
            }
        };

        if let Some(text) = self.cache.get_response(&fingerprint).await {
            debug!(stage = %call.stage, "model reply served from cache");
            return Ok(CapabilityReply {
                text,
                model: self.inner.model().to_string(),
            });
        }

        let reply = self.inner.invoke(call).await?;
        self.cache.set_response(&fingerprint, &reply.text).await;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn call() -> CapabilityCall {
        CapabilityCall {
            subject: "Acme".into(),
            stage: StageName::Research,
            system_prompt: "sys".into(),
            prompt: "user".into(),
            max_tokens: 100,
        }
    }

    #[test]
    fn parse_openai() {
        let json = serde_json::json!({
            "model": "gpt-x",
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        let reply = parse_openai_response(&json, "fallback").unwrap();
        assert_eq!(reply.text, "hello");
        assert_eq!(reply.model, "gpt-x");
        assert!(parse_openai_response(&serde_json::json!({"choices": []}), "m").is_err());
    }

    #[test]
    fn parse_ollama() {
        let json = serde_json::json!({"message": {"role": "assistant", "content": "hi"}});
        let reply = parse_ollama_response(&json, "llama3").unwrap();
        assert_eq!(reply.text, "hi");
        assert_eq!(reply.model, "llama3");
        let empty = serde_json::json!({"message": {"content": "  "}});
        assert!(parse_ollama_response(&empty, "m").is_err());
    }

    #[test]
    fn missing_api_key_is_configuration_error() {
        let config = CapabilityConfig {
            provider: "openai".into(),
            api_key_env: "INTEL_HARNESS_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..CapabilityConfig::default()
        };
        let err = create_capability(&config).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn disabled_capability_fails_calls() {
        let cap = create_capability(&CapabilityConfig::default()).unwrap();
        assert_eq!(cap.name(), "disabled");
        assert!(cap.invoke(&call()).await.is_err());
    }

    async fn spawn_mock(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn ollama_retries_server_errors() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/api/chat",
            post(move |Json(body): Json<serde_json::Value>| {
                let counter = counter.clone();
                async move {
                    assert_eq!(body["stream"], false);
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(axum::http::StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(serde_json::json!({"message": {"content": "done"}})))
                    }
                }
            }),
        );
        let base = spawn_mock(app).await;
        let cap = OllamaCapability::new(&CapabilityConfig {
            provider: "ollama".into(),
            base_url: Some(base),
            max_retries: 1,
            ..CapabilityConfig::default()
        })
        .unwrap();

        let reply = cap.invoke(&call()).await.unwrap();
        assert_eq!(reply.text, "done");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/api/chat",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    axum::http::StatusCode::BAD_REQUEST
                }
            }),
        );
        let base = spawn_mock(app).await;
        let cap = OllamaCapability::new(&CapabilityConfig {
            provider: "ollama".into(),
            base_url: Some(base),
            max_retries: 3,
            ..CapabilityConfig::default()
        })
        .unwrap();

        let err = cap.invoke(&call()).await.unwrap_err();
        assert!(err.to_string().contains("400"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    /// Counts calls; fails the ones whose prompt contains "fail".
    struct CountingCapability {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Capability for CountingCapability {
        fn name(&self) -> &str {
            "counting"
        }

        fn model(&self) -> &str {
            "count-1"
        }

        async fn invoke(&self, call: &CapabilityCall) -> Result<CapabilityReply> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call.prompt.contains("fail") {
                bail!("upstream error");
            }
            Ok(CapabilityReply {
                text: format!("reply #{}", n),
                model: "count-1".into(),
            })
        }
    }

    fn cached_counter() -> (CachedCapability, Arc<CountingCapability>, Arc<ResultCache>) {
        use intel_harness_core::store::memory::InMemoryBackend;
        let inner = Arc::new(CountingCapability {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(ResultCache::new(
            Arc::new(InMemoryBackend::default()),
            "ci",
            crate::config::TtlConfig::default(),
        ));
        (CachedCapability::new(inner.clone(), cache.clone()), inner, cache)
    }

    #[tokio::test]
    async fn repeated_prompt_is_served_from_cache() {
        let (cap, inner, cache) = cached_counter();
        assert_eq!(cap.model(), "count-1");

        let first = cap.invoke(&call()).await.unwrap();
        let second = cap.invoke(&call()).await.unwrap();
        assert_eq!(first.text, "reply #1");
        assert_eq!(second.text, "reply #1");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().await.response_cached, 1);

        // A different stage or prompt is a miss.
        let mut other = call();
        other.stage = StageName::Write;
        assert_eq!(cap.invoke(&other).await.unwrap().text, "reply #2");
        let mut other = call();
        other.prompt = "user, but longer".into();
        assert_eq!(cap.invoke(&other).await.unwrap().text, "reply #3");

        // Clearing the subject drops cached replies too.
        assert_eq!(cache.clear_subject("Acme").await, 3);
        assert_eq!(cap.invoke(&call()).await.unwrap().text, "reply #4");
    }

    #[tokio::test]
    async fn failed_replies_are_not_cached() {
        let (cap, inner, cache) = cached_counter();
        let mut failing = call();
        failing.prompt = "please fail".into();
        assert!(cap.invoke(&failing).await.is_err());
        assert!(cap.invoke(&failing).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().await.response_cached, 0);
    }
}
