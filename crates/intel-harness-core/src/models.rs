//! Core data models that flow through the analysis pipeline.
//!
//! A [`PipelineRun`] is created per request, mutated only by the task that
//! owns it, and discarded after its [`AnalysisReport`] has been cached and
//! returned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fingerprint::FocusArea;
use crate::metrics::Metrics;
use crate::profiles::AnalysisMode;

/// The three sequential pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Research,
    Analyze,
    Write,
}

impl StageName {
    /// All stages in the order the orchestrator runs them.
    pub const ALL: [StageName; 3] = [StageName::Research, StageName::Analyze, StageName::Write];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Research => "research",
            StageName::Analyze => "analyze",
            StageName::Write => "write",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of exactly one stage invocation.
///
/// On failure `error` is set and `output` is left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when the output was reused from the research cache instead of
    /// calling the capability.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
}

impl StageResult {
    pub fn success(stage: StageName, output: String, started_at: DateTime<Utc>) -> Self {
        Self {
            stage,
            output,
            started_at,
            completed_at: Utc::now(),
            error: None,
            cached: false,
        }
    }

    pub fn failure(stage: StageName, error: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            stage,
            output: String::new(),
            started_at,
            completed_at: Utc::now(),
            error: Some(error.into()),
            cached: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Lifecycle status of a [`PipelineRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// Where and why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Failing stage; `None` when the run was cancelled between stages.
    pub stage: Option<StageName>,
    pub message: String,
}

/// The final assembled result of a successful run. This is the payload that
/// gets cached and streamed in the `complete` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub competitor: String,
    pub website: Option<String>,
    pub focus: FocusArea,
    pub analysis_mode: AnalysisMode,
    pub research_findings: String,
    pub strategic_analysis: String,
    pub final_report: String,
    pub metrics: Metrics,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub workflow: String,
}

/// One end-to-end execution of the pipeline for a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub fingerprint: String,
    pub stages: Vec<StageResult>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_payload: Option<AnalysisReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// True when the payload was served from the result cache.
    #[serde(default)]
    pub cache_hit: bool,
}

impl PipelineRun {
    pub fn new(run_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            fingerprint: fingerprint.into(),
            stages: Vec::new(),
            status: RunStatus::Running,
            final_payload: None,
            failure: None,
            cache_hit: false,
        }
    }

    /// Output of a completed stage, if that stage ran and succeeded.
    pub fn stage_output(&self, stage: StageName) -> Option<&str> {
        self.stages
            .iter()
            .find(|s| s.stage == stage && s.is_success())
            .map(|s| s.output.as_str())
    }

    pub fn stage(&self, stage: StageName) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}
