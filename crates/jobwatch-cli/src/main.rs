use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobwatch_storage::CsvJobStore;
use jobwatch_sync::{PageInput, ScanConfig, ScanPipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jobwatch-cli")]
#[command(about = "Watch a job search page and report listings not seen before")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one scan cycle (default).
    Scan {
        /// Parse a saved, browser-rendered search page instead of fetching it.
        #[arg(long)]
        html: Option<PathBuf>,
        /// Override JOBWATCH_STORE_PATH.
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Print the stored listing history.
    List {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Scan {
        html: None,
        store: None,
    }) {
        Commands::Scan { html, store } => {
            let mut config = ScanConfig::from_env();
            if let Some(store) = store {
                config.store_path = store;
            }
            let input = match html {
                Some(path) => PageInput::HtmlFile(path),
                None => PageInput::Fetch,
            };
            let summary = ScanPipeline::new(config)?.run_once(input).await?;
            println!(
                "scan complete: run_id={} scraped={} new={} stored={} notified={}",
                summary.run_id, summary.scraped, summary.new, summary.stored_total, summary.notified
            );
        }
        Commands::List { store, json } => {
            let path = store.unwrap_or_else(|| ScanConfig::from_env().store_path);
            let jobs = CsvJobStore::new(path).load().await;
            if json {
                let text = serde_json::to_string_pretty(jobs.records())
                    .context("serializing job store")?;
                println!("{text}");
            } else {
                for job in jobs.records() {
                    println!(
                        "{}\n  {}\n  {}\n  {}",
                        job.title.trim(),
                        job.posted.trim(),
                        job.payment_info.trim(),
                        job.link.trim()
                    );
                }
                tracing::info!(total = jobs.len(), "listed job store");
            }
        }
    }

    Ok(())
}
