//! # Intel Harness CLI (`intel`)
//!
//! ## Usage
//!
//! ```bash
//! intel --config ./config/intel.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `intel serve` | Start the HTTP + SSE server |
//! | `intel analyze <subject>` | Run one analysis and print the JSON report |
//! | `intel cache stats` | Show cached entry counts |
//! | `intel cache clear <subject>` | Drop cached entries for one subject |
//! | `intel cache ping` | Check cache backend connectivity |
//!
//! ## Examples
//!
//! ```bash
//! intel analyze "Acme Corp" --url https://acme.test --focus pricing --mode deep
//! intel analyze "Acme Corp" --progress json 2>events.jsonl >report.json
//! intel serve --config ./config/intel.toml
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use intel_harness::cache::build_cache;
use intel_harness::config;
use intel_harness::logging;
use intel_harness::orchestrator::build_orchestrator;
use intel_harness::progress::ProgressMode;
use intel_harness::server;
use intel_harness_core::fingerprint::AnalysisRequest;
use intel_harness_core::models::RunStatus;

/// Intel Harness: cached, streaming competitive-intelligence pipeline.
#[derive(Parser)]
#[command(
    name = "intel",
    about = "Intel Harness: cached, streaming multi-stage analysis pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/intel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Run the research → analyze → write pipeline for one subject.
    ///
    /// The final report is printed as JSON on stdout; progress goes to
    /// stderr.
    Analyze {
        /// Company or product to analyze.
        subject: String,

        /// Subject's website.
        #[arg(long)]
        url: Option<String>,

        /// Focus area: all, pricing, product, funding, leadership, market.
        #[arg(long)]
        focus: Option<String>,

        /// Analysis mode: simple or deep.
        #[arg(long)]
        mode: Option<String>,

        /// Progress output on stderr. Defaults to `human` on a TTY,
        /// otherwise `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Inspect or clear the result cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry counts per category.
    Stats,
    /// Delete every cached entry for a subject.
    Clear { subject: String },
    /// Check backend connectivity.
    Ping,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Analyze {
            subject,
            url,
            focus,
            mode,
            progress,
        } => {
            let orchestrator = build_orchestrator(&cfg).await?;
            let request = AnalysisRequest {
                subject,
                url,
                focus,
                mode,
            };
            let reporter = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            let run = orchestrator.run(&request, reporter.as_ref(), &cancel).await?;
            match (run.status, &run.final_payload) {
                (RunStatus::Succeeded, Some(report)) => {
                    println!("{}", serde_json::to_string_pretty(report)?);
                }
                _ => {
                    println!("{}", serde_json::to_string_pretty(&run)?);
                    let reason = run
                        .failure
                        .as_ref()
                        .map(|f| f.message.clone())
                        .unwrap_or_else(|| "pipeline failed".to_string());
                    anyhow::bail!("analysis failed: {}", reason);
                }
            }
        }
        Commands::Cache { action } => {
            let cache = build_cache(&cfg.cache).await;
            match action {
                CacheAction::Stats => {
                    println!("{}", serde_json::to_string_pretty(&cache.stats().await)?);
                }
                CacheAction::Clear { subject } => {
                    let removed = cache.clear_subject(&subject).await;
                    println!("Removed {} cached entries for '{}'.", removed, subject);
                }
                CacheAction::Ping => {
                    if cache.ping().await {
                        println!("Cache backend reachable.");
                    } else {
                        anyhow::bail!("cache backend unreachable or disabled");
                    }
                }
            }
        }
    }

    Ok(())
}
