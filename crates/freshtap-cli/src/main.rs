use anyhow::Result;
use clap::{Parser, Subcommand};
use freshtap_sync::AggregateConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "freshtap-cli")]
#[command(about = "Freshtap aggregation command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one aggregation pass over every configured source.
    Run,
    /// Print per-source scraper health from the metrics ledger.
    Metrics,
    /// Wipe every persisted ledger and the merged snapshot.
    Reset,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = freshtap_sync::run_once_from_env().await?;
            println!(
                "run complete: run_id={} candidates={} merged={} new={}",
                summary.run_id, summary.total_candidates, summary.merged_items, summary.new_items
            );
            for (source, outcome) in &summary.sources {
                if outcome.success {
                    println!("  {source}: ok, {} items", outcome.items);
                } else {
                    println!(
                        "  {source}: failed ({})",
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
        Commands::Metrics => {
            let config = AggregateConfig::from_env();
            let summary = freshtap_sync::metrics_summary(&config).await?;
            println!(
                "{} sources, {} attempts, {} successes, {} items",
                summary.overall.total_sources,
                summary.overall.total_attempts,
                summary.overall.total_successes,
                summary.overall.total_items
            );
            for (name, source) in &summary.sources {
                println!(
                    "  {name} [{technique}] {status:?}: {successes}/{attempts} ok, {items} items, recent {recent:.0}%",
                    technique = source.technique,
                    status = source.status,
                    successes = source.successes,
                    attempts = source.attempts,
                    items = source.items_found,
                    recent = source.recent_success_rate
                );
            }
        }
        Commands::Reset => {
            let config = AggregateConfig::from_env();
            freshtap_sync::reset_ledgers(&config).await?;
            println!("ledgers reset under {}", config.data_dir.display());
        }
    }

    Ok(())
}
