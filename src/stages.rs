//! Runs one pipeline stage: build the prompt, call the capability, wrap
//! the outcome in a [`StageResult`].
//!
//! A failed call never escapes as an `Err`. It is recorded in
//! `StageResult::error` and the orchestrator decides what to do with it.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use intel_harness_core::error::HarnessError;
use intel_harness_core::events::ProgressEvent;
use intel_harness_core::fingerprint::FocusArea;
use intel_harness_core::models::{StageName, StageResult};
use intel_harness_core::profiles::{profile, AnalysisMode, PromptInput};

use crate::capability::{Capability, CapabilityCall};
use crate::sink::EventSink;

/// Run metadata plus the outputs of earlier stages.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub subject: &'a str,
    pub url: Option<&'a str>,
    pub focus: FocusArea,
    pub mode: AnalysisMode,
    pub research: Option<&'a str>,
    pub analysis: Option<&'a str>,
}

fn start_message(stage: StageName, mode: AnalysisMode) -> &'static str {
    match (stage, mode) {
        (StageName::Research, AnalysisMode::Simple) => "Researcher gathering essential information",
        (StageName::Research, AnalysisMode::Deep) => "Researcher performing comprehensive investigation",
        (StageName::Analyze, AnalysisMode::Simple) => "Analyst performing strategic analysis",
        (StageName::Analyze, AnalysisMode::Deep) => "Analyst performing deep strategic analysis",
        (StageName::Write, _) => "Writer creating final report",
    }
}

#[derive(Clone)]
pub struct StageRunner {
    capability: Arc<dyn Capability>,
}

impl StageRunner {
    pub fn new(capability: Arc<dyn Capability>) -> Self {
        Self { capability }
    }

    /// Execute `stage` once.
    ///
    /// Emits `{stage}_start`, a `tool_call`, and on success
    /// `{stage}_complete`. The capability call is abandoned as soon as
    /// `cancel` fires.
    pub async fn run(
        &self,
        stage: StageName,
        ctx: &StageContext<'_>,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> StageResult {
        let started_at = Utc::now();
        let stage_profile = profile(ctx.mode).stage(stage);

        sink.emit(ProgressEvent::stage_status(
            stage,
            format!("{}_start", stage),
            start_message(stage, ctx.mode),
        ))
        .await;

        let call = CapabilityCall {
            subject: ctx.subject.to_string(),
            stage,
            system_prompt: stage_profile.system_prompt.to_string(),
            prompt: stage_profile.render(&PromptInput {
                subject: ctx.subject,
                url: ctx.url,
                focus: ctx.focus,
                research: ctx.research,
                analysis: ctx.analysis,
            }),
            max_tokens: stage_profile.max_tokens,
        };

        sink.emit(ProgressEvent::tool_call(
            self.capability.name(),
            stage,
            serde_json::json!({
                "subject": ctx.subject,
                "focus": ctx.focus,
                "word_budget": stage_profile.word_budget,
                "max_tokens": call.max_tokens,
            }),
        ))
        .await;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HarnessError::Cancelled.to_string()),
            reply = self.capability.invoke(&call) => reply.map_err(|e| format!("{e:#}")),
        };

        match outcome {
            Ok(reply) => {
                info!(stage = %stage, model = %reply.model, chars = reply.text.len(), "stage complete");
                sink.emit(ProgressEvent::stage_status(
                    stage,
                    format!("{}_complete", stage),
                    format!("{} stage completed", stage),
                ))
                .await;
                StageResult::success(stage, reply.text, started_at)
            }
            Err(message) => {
                warn!(stage = %stage, error = %message, "stage failed");
                StageResult::failure(stage, message, started_at)
            }
        }
    }
}
