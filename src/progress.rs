//! Progress reporting for `intel analyze`.
//!
//! Reports pipeline events as they happen so users see which stage is
//! running. Progress is emitted on **stderr** so stdout stays parseable:
//! the final report is the only thing printed there.

use std::io::Write;

use async_trait::async_trait;

use intel_harness_core::events::{EventKind, ProgressEvent};

use crate::sink::{EventSink, NoopSink};

/// Human-friendly progress on stderr: `[analyze] analyze_start  Analyst performing strategic analysis`.
pub struct StderrProgress;

fn human_line(event: &ProgressEvent) -> Option<String> {
    let line = match &event.kind {
        EventKind::SessionStart { message, .. } => format!("{}\n", message),
        EventKind::StatusUpdate {
            step,
            message,
            stage,
        } => match stage {
            Some(stage) => format!("[{}] {}  {}\n", stage, step, message),
            None => format!("{}  {}\n", step, message),
        },
        EventKind::ToolCall {
            tool_name, stage, ..
        } => format!("[{}] calling {}\n", stage, tool_name),
        EventKind::Heartbeat => return None,
        EventKind::Complete { data } => format!(
            "complete  {} ({} chars)\n",
            data.competitor,
            data.final_report.len()
        ),
        EventKind::Error { message, .. } => format!("error  {}\n", message),
    };
    Some(line)
}

#[async_trait]
impl EventSink for StderrProgress {
    async fn emit(&self, event: ProgressEvent) {
        if let Some(line) = human_line(&event) {
            let mut stderr = std::io::stderr().lock();
            let _ = stderr.write_all(line.as_bytes());
            let _ = stderr.flush();
        }
    }
}

/// Machine-readable progress: one JSON event per line on stderr, in the
/// same shape as the streaming endpoint.
pub struct JsonProgress;

#[async_trait]
impl EventSink for JsonProgress {
    async fn emit(&self, event: ProgressEvent) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", event.to_json());
        let _ = stderr.flush();
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn EventSink> {
        match self {
            ProgressMode::Off => Box::new(NoopSink),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
