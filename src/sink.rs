//! Where progress events go.
//!
//! The orchestrator and stage runner only see `&dyn EventSink`. Streaming
//! sessions plug in a channel-backed sink, the CLI plugs in a progress
//! reporter, and the blocking HTTP endpoint uses [`NoopSink`].

use async_trait::async_trait;

use intel_harness_core::events::ProgressEvent;
use intel_harness_core::profiles::AnalysisMode;

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Delivery failures (a consumer that went away)
    /// are swallowed; they never fail the run.
    async fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn emit(&self, _event: ProgressEvent) {}
}

/// Stamps `analysis_mode` onto every event before forwarding it.
pub struct ModeSink<'a> {
    inner: &'a dyn EventSink,
    mode: AnalysisMode,
}

impl<'a> ModeSink<'a> {
    pub fn new(inner: &'a dyn EventSink, mode: AnalysisMode) -> Self {
        Self { inner, mode }
    }
}

#[async_trait]
impl EventSink for ModeSink<'_> {
    async fn emit(&self, event: ProgressEvent) {
        self.inner.emit(event.with_mode(self.mode)).await;
    }
}

/// Collects events in memory. Used by tests and by callers that want the
/// full event log after a run.
#[derive(Default)]
pub struct CollectingSink {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// `type` tags in emission order.
    pub fn types(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.type_name()).collect()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
