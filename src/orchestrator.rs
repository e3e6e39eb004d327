//! Pipeline orchestrator: cache check, three sequential stages, write-through.
//!
//! ```text
//!  NotStarted ──▶ CacheCheck ──hit──────────────────────────────▶ Succeeded
//!                     │
//!                     └─miss─▶ Running(research) ─▶ Running(analyze) ─▶ Running(write) ─▶ Succeeded
//!                                     │                   │                   │
//!                                     └───────────────────┴───────────────────┴──error──▶ Failed
//! ```
//!
//! Event sequence on a miss:
//!
//! | Step | Event |
//! |------|-------|
//! | run starts | `status_update` `start` |
//! | research reused | `status_update` `research_cache_hit` |
//! | each stage | `status_update` `{stage}_start`, `tool_call`, `status_update` `{stage}_complete` |
//! | report stored | `status_update` `cache_stored` |
//! | end | `complete` or `error` |
//!
//! On a hit the sequence is `status_update` `cache_hit` then `complete`.
//!
//! Concurrent requests for the same uncached fingerprint both run the full
//! pipeline; the later write wins. There is no in-flight deduplication.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use intel_harness_core::error::HarnessError;
use intel_harness_core::events::ProgressEvent;
use intel_harness_core::fingerprint::{AnalysisRequest, Fingerprint, FingerprintBuilder, FocusArea};
use intel_harness_core::metrics::extract_metrics;
use intel_harness_core::models::{
    AnalysisReport, PipelineRun, RunFailure, RunStatus, StageName, StageResult,
};
use intel_harness_core::profiles::{profile, AnalysisMode};

use crate::cache::{build_cache, ResultCache};
use crate::capability::{create_capability, CachedCapability};
use crate::config::Config;
use crate::sink::{EventSink, ModeSink};
use crate::stages::{StageContext, StageRunner};

/// A validated request, ready to execute.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub subject: String,
    pub url: Option<String>,
    pub focus: FocusArea,
    pub mode: AnalysisMode,
    pub fingerprint: Fingerprint,
    /// Mode-independent key for research reuse.
    pub research_fingerprint: Fingerprint,
}

impl PreparedRun {
    /// Validate and fingerprint a request.
    pub fn from_request(request: &AnalysisRequest) -> Result<Self, HarnessError> {
        let builder = FingerprintBuilder::from_request(request)?;
        let focus = match request.focus.as_deref() {
            Some(tag) => tag.parse()?,
            None => FocusArea::All,
        };
        let mode = match request.mode.as_deref() {
            Some(m) => m.parse()?,
            None => AnalysisMode::default(),
        };
        Ok(Self {
            subject: request.subject.trim().to_string(),
            url: request.url.clone(),
            focus,
            mode,
            fingerprint: builder.build()?,
            research_fingerprint: builder.without_mode().build()?,
        })
    }
}

pub struct PipelineOrchestrator {
    cache: Arc<ResultCache>,
    runner: StageRunner,
}

impl PipelineOrchestrator {
    pub fn new(cache: Arc<ResultCache>, runner: StageRunner) -> Self {
        Self { cache, runner }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Validate, then execute. Only validation errors are returned as
    /// `Err`; stage failures come back as a failed [`PipelineRun`].
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun, HarnessError> {
        let prepared = PreparedRun::from_request(request)?;
        Ok(self.execute(&prepared, sink, cancel).await)
    }

    /// Execute a prepared run to completion, emitting exactly one terminal
    /// event.
    pub async fn execute(
        &self,
        prepared: &PreparedRun,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!(
            "pipeline",
            run_id = %run_id,
            fingerprint = %prepared.fingerprint,
            mode = %prepared.mode,
        );
        let sink = ModeSink::new(sink, prepared.mode);
        self.execute_inner(run_id, prepared, &sink, cancel)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        run_id: String,
        prepared: &PreparedRun,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        let mut run = PipelineRun::new(run_id, prepared.fingerprint.digest());

        // CacheCheck
        if let Some(report) = self.cache.get_analysis(&prepared.fingerprint).await {
            info!(subject = %prepared.subject, "serving cached analysis");
            sink.emit(ProgressEvent::status(
                "cache_hit",
                format!("Using cached {} analysis for {}", prepared.mode, prepared.subject),
            ))
            .await;
            run.status = RunStatus::Succeeded;
            run.cache_hit = true;
            run.final_payload = Some(report.clone());
            sink.emit(ProgressEvent::complete(report)).await;
            return run;
        }

        info!(subject = %prepared.subject, "starting pipeline");
        sink.emit(ProgressEvent::status(
            "start",
            format!(
                "Starting {} analysis of {}",
                profile(prepared.mode).label,
                prepared.subject
            ),
        ))
        .await;

        for stage in StageName::ALL {
            if cancel.is_cancelled() {
                return self.fail(run, None, HarnessError::Cancelled.to_string(), sink).await;
            }

            let result = if stage == StageName::Research {
                match self.cached_research(prepared, sink).await {
                    Some(result) => result,
                    None => self.run_stage(stage, prepared, &run, sink, cancel).await,
                }
            } else {
                self.run_stage(stage, prepared, &run, sink, cancel).await
            };

            if let Some(message) = result.error.clone() {
                run.stages.push(result);
                return self.fail(run, Some(stage), message, sink).await;
            }

            if stage == StageName::Research && !result.cached {
                self.cache
                    .set_research(&prepared.research_fingerprint, &result.output)
                    .await;
            }
            run.stages.push(result);
        }

        let report = self.assemble(prepared, &run);
        run.status = RunStatus::Succeeded;
        run.final_payload = Some(report.clone());

        if self.cache.set_analysis(&prepared.fingerprint, &report).await {
            sink.emit(ProgressEvent::status(
                "cache_stored",
                "Analysis cached for future requests",
            ))
            .await;
        }
        info!("pipeline succeeded");
        sink.emit(ProgressEvent::complete(report)).await;
        run
    }

    async fn cached_research(&self, prepared: &PreparedRun, sink: &dyn EventSink) -> Option<StageResult> {
        let findings = self.cache.get_research(&prepared.research_fingerprint).await?;
        sink.emit(ProgressEvent::stage_status(
            StageName::Research,
            "research_cache_hit",
            "Using cached research findings",
        ))
        .await;
        let mut result = StageResult::success(StageName::Research, findings, Utc::now());
        result.cached = true;
        Some(result)
    }

    async fn run_stage(
        &self,
        stage: StageName,
        prepared: &PreparedRun,
        run: &PipelineRun,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> StageResult {
        let ctx = StageContext {
            subject: &prepared.subject,
            url: prepared.url.as_deref(),
            focus: prepared.focus,
            mode: prepared.mode,
            research: run.stage_output(StageName::Research),
            analysis: run.stage_output(StageName::Analyze),
        };
        self.runner.run(stage, &ctx, sink, cancel).await
    }

    async fn fail(
        &self,
        mut run: PipelineRun,
        stage: Option<StageName>,
        message: String,
        sink: &dyn EventSink,
    ) -> PipelineRun {
        warn!(stage = ?stage, error = %message, "pipeline failed");
        run.status = RunStatus::Failed;
        run.failure = Some(RunFailure {
            stage,
            message: message.clone(),
        });
        let text = match stage {
            Some(stage) => HarnessError::StageFailure { stage, message }.to_string(),
            None => message,
        };
        sink.emit(ProgressEvent::error(text, stage, run.stages.clone()))
            .await;
        run
    }

    fn assemble(&self, prepared: &PreparedRun, run: &PipelineRun) -> AnalysisReport {
        let analysis = run.stage_output(StageName::Analyze).unwrap_or_default();
        AnalysisReport {
            competitor: prepared.subject.clone(),
            website: prepared.url.clone(),
            focus: prepared.focus,
            analysis_mode: prepared.mode,
            research_findings: run
                .stage_output(StageName::Research)
                .unwrap_or_default()
                .to_string(),
            strategic_analysis: analysis.to_string(),
            final_report: run.stage_output(StageName::Write).unwrap_or_default().to_string(),
            metrics: extract_metrics(analysis),
            timestamp: Utc::now(),
            status: "success".to_string(),
            workflow: profile(prepared.mode).workflow(),
        }
    }
}

/// Wire up cache, capability and runner from configuration.
///
/// Fails with [`HarnessError::Configuration`] when no capability provider
/// is configured or its credentials are missing.
pub async fn build_orchestrator(config: &Config) -> anyhow::Result<PipelineOrchestrator> {
    if !config.capability.is_enabled() {
        return Err(HarnessError::Configuration(
            "capability.provider is 'disabled'; set it to 'openai' or 'ollama' to run analyses"
                .to_string(),
        )
        .into());
    }
    let cache = Arc::new(build_cache(&config.cache).await);
    let capability = Arc::new(CachedCapability::new(
        create_capability(&config.capability)?,
        cache.clone(),
    ));
    Ok(PipelineOrchestrator::new(cache, StageRunner::new(capability)))
}
