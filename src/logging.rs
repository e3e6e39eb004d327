//! Tracing subscriber setup.
//!
//! Logs go to stderr so that `intel analyze` can print its JSON report on
//! stdout. `RUST_LOG` takes precedence over `[logging].level`.

use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "intel_harness={level},intel_harness_core={level},tower_http=warn",
            level = config.level
        ))
    });

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_target(true)
        .with_timer(ChronoUtc::new("%Y-%m-%d %H:%M:%S".to_string()));

    let layer = if config.json {
        layer.json().flatten_event(true).boxed()
    } else {
        layer.boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init();
}
