//! Stable cache keys derived from normalized request fields.
//!
//! A [`Fingerprint`] is a SHA-256 digest over the canonical JSON encoding of
//! the normalized field set `{subject, url, focus, mode}`. Field order does
//! not matter (keys are sorted before hashing); the subject and focus tag
//! are trimmed and lower-cased; the URL is passed through untouched, so an
//! absent URL and an empty-string URL hash differently.
//!
//! ```
//! use intel_harness_core::fingerprint::{AnalysisRequest, FingerprintBuilder};
//!
//! let a = FingerprintBuilder::from_request(&AnalysisRequest::new("Acme")).unwrap();
//! let b = FingerprintBuilder::from_request(&AnalysisRequest::new("  acme ")).unwrap();
//! assert_eq!(a.build().unwrap(), b.build().unwrap());
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::HarnessError;
use crate::models::StageName;
use crate::profiles::AnalysisMode;

/// Focus tag narrowing what the research stage looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusArea {
    #[default]
    All,
    Pricing,
    Product,
    Funding,
    Leadership,
    Market,
}

impl FocusArea {
    pub const ALL: [FocusArea; 6] = [
        FocusArea::All,
        FocusArea::Pricing,
        FocusArea::Product,
        FocusArea::Funding,
        FocusArea::Leadership,
        FocusArea::Market,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FocusArea::All => "all",
            FocusArea::Pricing => "pricing",
            FocusArea::Product => "product",
            FocusArea::Funding => "funding",
            FocusArea::Leadership => "leadership",
            FocusArea::Market => "market",
        }
    }
}

impl fmt::Display for FocusArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FocusArea {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_lowercase();
        FocusArea::ALL
            .into_iter()
            .find(|f| f.as_str() == tag)
            .ok_or_else(|| {
                HarnessError::InvalidRequest(format!(
                    "unknown focus area '{}'; expected one of: all, pricing, product, funding, leadership, market",
                    s.trim()
                ))
            })
    }
}

/// Raw analysis request as received from a client.
///
/// Field aliases accept the request shape used by the HTTP API
/// (`competitor_name`, `competitor_website`, `analysis_mode`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(alias = "competitor_name")]
    pub subject: String,
    #[serde(default, alias = "competitor_website")]
    pub url: Option<String>,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default, alias = "analysis_mode")]
    pub mode: Option<String>,
}

impl AnalysisRequest {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }
}

/// Opaque, deterministic cache key for one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    digest: String,
    subject_slug: String,
}

impl Fingerprint {
    /// Hex-encoded SHA-256 digest (64 chars).
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Key-safe slug of the normalized subject, used for subject-scoped
    /// invalidation.
    pub fn subject_slug(&self) -> &str {
        &self.subject_slug
    }

    /// Backend key: `{prefix}:{category}:{subject_slug}:{digest}`.
    pub fn cache_key(&self, prefix: &str, category: &str) -> String {
        format!("{}:{}:{}:{}", prefix, category, self.subject_slug, self.digest)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

/// Builds [`Fingerprint`]s from request fields.
#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    subject: String,
    url: Option<String>,
    focus: FocusArea,
    mode: Option<AnalysisMode>,
}

impl FingerprintBuilder {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            url: None,
            focus: FocusArea::All,
            mode: None,
        }
    }

    /// Validate a raw request and load its fields into a builder.
    ///
    /// Fails with `InvalidRequest` for an empty subject or an unknown focus
    /// tag or mode.
    pub fn from_request(request: &AnalysisRequest) -> Result<Self, HarnessError> {
        let focus = match request.focus.as_deref() {
            Some(tag) => tag.parse()?,
            None => FocusArea::All,
        };
        let mode = match request.mode.as_deref() {
            Some(m) => m.parse()?,
            None => AnalysisMode::default(),
        };
        let builder = Self::new(request.subject.clone())
            .url(request.url.clone())
            .focus(focus)
            .mode(mode);
        if normalize_subject(&builder.subject).is_empty() {
            return Err(HarnessError::InvalidRequest(
                "subject must not be empty".to_string(),
            ));
        }
        Ok(builder)
    }

    pub fn url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn focus(mut self, focus: FocusArea) -> Self {
        self.focus = focus;
        self
    }

    pub fn mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Drop the mode so the fingerprint is shared across analysis modes.
    /// Used for research-stage reuse.
    pub fn without_mode(mut self) -> Self {
        self.mode = None;
        self
    }

    /// Compute the fingerprint.
    pub fn build(&self) -> Result<Fingerprint, HarnessError> {
        let subject = normalize_subject(&self.subject);
        if subject.is_empty() {
            return Err(HarnessError::InvalidRequest(
                "subject must not be empty".to_string(),
            ));
        }

        let mut fields: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        fields.insert("subject", serde_json::Value::String(subject.clone()));
        fields.insert(
            "url",
            self.url
                .clone()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        );
        fields.insert(
            "focus",
            serde_json::Value::String(self.focus.as_str().to_string()),
        );
        if let Some(mode) = self.mode {
            fields.insert("mode", serde_json::Value::String(mode.as_str().to_string()));
        }

        Ok(Fingerprint {
            digest: digest_fields(&fields)?,
            subject_slug: subject_slug(&subject),
        })
    }
}

/// Fingerprint of one model call: stage, both prompts (trimmed), model and
/// token budget. Filed under the subject's slug so a subject clear also
/// drops its cached replies.
pub fn response_fingerprint(
    subject: &str,
    stage: StageName,
    system_prompt: &str,
    prompt: &str,
    model: &str,
    max_tokens: u32,
) -> Result<Fingerprint, HarnessError> {
    let mut fields: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
    fields.insert("stage", stage.as_str().into());
    fields.insert("system_prompt", system_prompt.trim().into());
    fields.insert("prompt", prompt.trim().into());
    fields.insert("model", model.into());
    fields.insert("max_tokens", max_tokens.into());
    Ok(Fingerprint {
        digest: digest_fields(&fields)?,
        subject_slug: subject_slug(subject),
    })
}

/// SHA-256 over the canonical JSON of `fields`. BTreeMap keeps the key
/// order fixed.
fn digest_fields(fields: &BTreeMap<&str, serde_json::Value>) -> Result<String, HarnessError> {
    let canonical =
        serde_json::to_string(fields).map_err(|e| HarnessError::Serialization(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Trim and lower-case. Inner whitespace is kept as given.
pub fn normalize_subject(subject: &str) -> String {
    subject.trim().to_lowercase()
}

/// Slug of a subject safe to embed in a key and in a glob pattern: only
/// alphanumerics separated by single dashes.
pub fn subject_slug(subject: &str) -> String {
    let normalized = normalize_subject(subject);
    let mut slug = String::with_capacity(normalized.len());
    for c in normalized.chars() {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "subject".to_string()
    } else {
        slug
    }
}
