//! Error taxonomy shared by the pipeline, cache, and HTTP layers.
//!
//! Per-run failures are reported as data (a failed [`PipelineRun`]) rather
//! than propagated; these variants exist so each boundary can classify what
//! went wrong.
//!
//! [`PipelineRun`]: crate::models::PipelineRun

use crate::models::StageName;

/// Errors that can surface at a request, cache, or startup boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarnessError {
    /// Malformed input, rejected before any work starts.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Cache backend unreachable. Never shown to callers; the cache degrades.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// One stage's external call failed and aborted the run.
    #[error("stage '{stage}' failed: {message}")]
    StageFailure { stage: StageName, message: String },

    /// An event or cache payload could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Missing credentials or invalid settings. Fatal at startup only.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The run was cancelled before it finished.
    #[error("run cancelled")]
    Cancelled,
}

impl HarnessError {
    /// Whether the error is the caller's fault (4xx) rather than a
    /// downstream failure (5xx).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::Configuration(_))
    }
}
