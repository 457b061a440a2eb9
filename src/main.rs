// src/main.rs

use clap::Parser;
use tracing::{info, warn};

use palisade::config::PipelineConfig;
use palisade::core::lifecycle::{ConsoleEvidenceStore, ConsoleRunStore, Pipeline, WorkItem};
use palisade::logging;

/// Runs one authorized reconnaissance probe against one target and exits
/// with the run's exit code.
#[derive(Debug, Parser)]
#[command(name = "palisade", version, about)]
struct Cli {
    /// Identifier for this run. Generated when omitted.
    #[arg(long)]
    run_id: Option<String>,

    /// Target hostname or URL.
    target: String,

    /// Probe to execute, e.g. TLS_CHECK or DNS_LOOKUP.
    probe: String,

    /// Approved domain the target must fall under. Repeatable.
    #[arg(long = "approved", required = true)]
    approved_domains: Vec<String>,
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    logging::initialize_logging()?;

    let cli = Cli::parse();
    let run_id = cli
        .run_id
        .unwrap_or_else(|| format!("run-{}", chrono::Utc::now().timestamp_millis()));

    let config = PipelineConfig::from_env();
    let pipeline = Pipeline::new(config, ConsoleRunStore, ConsoleEvidenceStore);

    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run.");
            cancel.cancel();
        }
    });

    let item = WorkItem {
        run_id,
        target: cli.target,
        probe: cli.probe,
        approved_domains: cli.approved_domains,
    };

    info!(run_id = %item.run_id, "Starting worker.");
    let record = pipeline.process(item).await?;
    std::process::exit(record.exit_code);
}
