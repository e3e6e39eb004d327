//! Typed progress events and their wire framing.
//!
//! Every event serializes to a flat JSON object:
//!
//! ```text
//! {"timestamp": "2026-01-01T00:00:00Z", "type": "status_update", "analysis_mode": "simple", ...}
//! ```
//!
//! and is framed for Server-Sent Events as `data: <json>\n\n`.
//!
//! | `type` | Emitted by | Terminal |
//! |--------|------------|----------|
//! | `session_start` | session manager, before any stage | no |
//! | `status_update` | orchestrator and stage runner | no |
//! | `tool_call` | stage runner, before each capability call | no |
//! | `heartbeat` | stream consumer, when idle | no |
//! | `complete` | orchestrator, on success or cache hit | yes |
//! | `error` | orchestrator, on stage failure or cancellation | yes |
//!
//! Encoding never fails: a payload that cannot be serialized is replaced by
//! an `error`-shaped fallback object that keeps the declared `type`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AnalysisReport, StageName, StageResult};
use crate::profiles::AnalysisMode;

/// One progress event for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_mode: Option<AnalysisMode>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Payload shape per event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SessionStart {
        session_id: String,
        message: String,
    },
    StatusUpdate {
        /// Machine-readable step tag (`start`, `research_complete`, `cache_hit`, ...).
        step: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<StageName>,
    },
    ToolCall {
        tool_name: String,
        stage: StageName,
        tool_input: serde_json::Value,
    },
    Heartbeat,
    Complete {
        data: Box<AnalysisReport>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<StageName>,
        /// Outputs of the stages that finished before the failure.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        partial_results: Vec<StageResult>,
    },
}

impl EventKind {
    /// The wire `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::SessionStart { .. } => "session_start",
            EventKind::StatusUpdate { .. } => "status_update",
            EventKind::ToolCall { .. } => "tool_call",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Complete { .. } => "complete",
            EventKind::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Complete { .. } | EventKind::Error { .. })
    }
}

impl ProgressEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            analysis_mode: None,
            kind,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_mode(mut self, mode: AnalysisMode) -> Self {
        self.analysis_mode = Some(mode);
        self
    }

    pub fn session_start(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EventKind::SessionStart {
            session_id: session_id.into(),
            message: message.into(),
        })
    }

    pub fn status(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EventKind::StatusUpdate {
            step: step.into(),
            message: message.into(),
            stage: None,
        })
    }

    pub fn stage_status(
        stage: StageName,
        step: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(EventKind::StatusUpdate {
            step: step.into(),
            message: message.into(),
            stage: Some(stage),
        })
    }

    pub fn tool_call(
        tool_name: impl Into<String>,
        stage: StageName,
        tool_input: serde_json::Value,
    ) -> Self {
        Self::new(EventKind::ToolCall {
            tool_name: tool_name.into(),
            stage,
            tool_input,
        })
    }

    pub fn heartbeat() -> Self {
        Self::new(EventKind::Heartbeat)
    }

    pub fn complete(report: AnalysisReport) -> Self {
        Self::new(EventKind::Complete {
            data: Box::new(report),
        })
    }

    pub fn error(
        message: impl Into<String>,
        stage: Option<StageName>,
        partial_results: Vec<StageResult>,
    ) -> Self {
        Self::new(EventKind::Error {
            message: message.into(),
            stage,
            partial_results,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// JSON encoding with the serialization fallback applied.
    pub fn to_json(&self) -> String {
        encode_json(self, self.type_name(), self.timestamp)
    }

    /// SSE frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> String {
        frame_sse(&self.to_json())
    }
}

/// Encode `value`, or a fallback object if it cannot be serialized.
///
/// The fallback keeps `declared_type` so a consumer switching on `type`
/// still sees the event it expected.
pub fn encode_json<T: Serialize>(value: &T, declared_type: &str, timestamp: DateTime<Utc>) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => serde_json::json!({
            "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "type": declared_type,
            "message": format!("event serialization failed: {}", e),
        })
        .to_string(),
    }
}

/// Wrap an already-encoded JSON payload as one SSE block.
pub fn frame_sse(json: &str) -> String {
    format!("data: {}\n\n", json)
}
