//! Shared fixtures: a scripted capability and cache/orchestrator builders.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use intel_harness::cache::ResultCache;
use intel_harness::capability::{CachedCapability, Capability, CapabilityCall, CapabilityReply};
use intel_harness::config::TtlConfig;
use intel_harness::orchestrator::PipelineOrchestrator;
use intel_harness::stages::StageRunner;
use intel_harness_core::clock::ManualClock;
use intel_harness_core::models::StageName;
use intel_harness_core::store::memory::InMemoryBackend;

pub const ANALYSIS_TEXT: &str = "\
## METRICS
- Competitive Threat Level: 4
- Market Position Score: 7
- Innovation Score: 8
- Financial Strength: 6
- Brand Recognition: 9
## SWOT SCORES
- Strengths: 8
- Weaknesses: 3
- Opportunities: 7
- Threats: 5
## ANALYSIS
Strong product, thin margins.";

/// Capability that answers from a script and records which stages called it.
#[derive(Default)]
pub struct ScriptedCapability {
    calls: Mutex<Vec<StageName>>,
    prompts: Mutex<Vec<String>>,
    fail_on: Option<StageName>,
    delay: Option<Duration>,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(stage: StageName) -> Self {
        Self {
            fail_on: Some(stage),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<StageName> {
        self.calls.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<CapabilityReply> {
        self.calls.lock().unwrap().push(call.stage);
        self.prompts.lock().unwrap().push(call.prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on == Some(call.stage) {
            bail!("upstream rate limited");
        }
        let text = match call.stage {
            StageName::Research => "Research notes: Acme sells widgets.".to_string(),
            StageName::Analyze => ANALYSIS_TEXT.to_string(),
            StageName::Write => "Executive summary: watch Acme.".to_string(),
        };
        Ok(CapabilityReply {
            text,
            model: "scripted-1".to_string(),
        })
    }
}

pub struct Harness {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub capability: Arc<ScriptedCapability>,
    pub backend: Arc<InMemoryBackend>,
    pub clock: Arc<ManualClock>,
}

pub fn harness_with(capability: ScriptedCapability, ttl: TtlConfig) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let backend = Arc::new(InMemoryBackend::with_clock(1_000, clock.clone()));
    let cache = ResultCache::new(backend.clone(), "ci", ttl).with_clock(clock.clone());
    let capability = Arc::new(capability);
    let orchestrator = PipelineOrchestrator::new(Arc::new(cache), StageRunner::new(capability.clone()));
    Harness {
        orchestrator: Arc::new(orchestrator),
        capability,
        backend,
        clock,
    }
}

pub fn harness(capability: ScriptedCapability) -> Harness {
    harness_with(capability, TtlConfig::default())
}

/// Like [`harness`], but model replies go through the response cache tier.
pub fn harness_with_response_cache(capability: ScriptedCapability) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let backend = Arc::new(InMemoryBackend::with_clock(1_000, clock.clone()));
    let cache = Arc::new(
        ResultCache::new(backend.clone(), "ci", TtlConfig::default()).with_clock(clock.clone()),
    );
    let capability = Arc::new(capability);
    let cached = Arc::new(CachedCapability::new(capability.clone(), cache.clone()));
    let orchestrator = PipelineOrchestrator::new(cache, StageRunner::new(cached));
    Harness {
        orchestrator: Arc::new(orchestrator),
        capability,
        backend,
        clock,
    }
}
