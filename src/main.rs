mod analysis;
mod api;
mod cleaner;
mod concurrent_fetcher;
mod models;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::InvestSiteClient;
use crate::concurrent_fetcher::{run_pipeline, PipelineOptions, ProgressEvent};
use crate::models::{Config, FetchMode, RecordStatus};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Optimized,
    SuperOptimized,
    Sequential,
    Custom,
}

/// Fetch and normalize InvestSite indicator data for a list of tickers.
#[derive(Debug, Parser)]
#[command(name = "investsite-stocks", version)]
struct Cli {
    /// Tickers to process, e.g. PETR4 VALE3 ITUB4
    tickers: Vec<String>,

    /// File with one ticker per line, used instead of positional tickers
    #[arg(long)]
    file: Option<PathBuf>,

    /// Operating mode
    #[arg(long, value_enum, default_value = "optimized")]
    mode: ModeArg,

    /// Worker count for custom mode (1-10)
    #[arg(long, default_value_t = 5)]
    workers: usize,

    /// Batch size for custom mode (5-50)
    #[arg(long, default_value_t = 20)]
    batch_size: usize,
}

impl Cli {
    fn fetch_mode(&self) -> FetchMode {
        match self.mode {
            ModeArg::Optimized => FetchMode::Optimized,
            ModeArg::SuperOptimized => FetchMode::SuperOptimized,
            ModeArg::Sequential => FetchMode::Sequential,
            ModeArg::Custom => FetchMode::Custom {
                workers: self.workers,
                batch_size: self.batch_size,
            },
        }
    }

    fn ticker_list(&self) -> Result<Vec<String>> {
        if let Some(path) = &self.file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading ticker file {}", path.display()))?;
            return Ok(content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect());
        }
        Ok(self.tickers.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("investsite_stocks=info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let cli = Cli::parse();
    let tickers = cli.ticker_list()?;
    if tickers.is_empty() {
        anyhow::bail!("no tickers given; pass them as arguments or via --file");
    }

    let config = Config::from_env()?;
    let client = InvestSiteClient::new(&config)?;

    // The pipeline only emits events; rendering them is this layer's job.
    let (progress_sender, progress_receiver) = broadcast::channel(256);
    let reporter = tokio::spawn(report_progress(progress_receiver));

    let options = PipelineOptions {
        progress: Some(progress_sender),
        ..Default::default()
    };

    let result = match run_pipeline(Arc::new(client), tickers, cli.fetch_mode(), options).await {
        Ok(result) => result,
        Err(e) => {
            error!("run failed: {}", e);
            std::process::exit(1);
        }
    };
    reporter.await?;

    let complete = result
        .records
        .iter()
        .filter(|r| r.status == RecordStatus::Complete)
        .count();
    let partial = result
        .records
        .iter()
        .filter(|r| r.status == RecordStatus::Partial)
        .count();

    println!();
    println!("Run summary");
    println!("  tickers processed: {}", result.total());
    println!("  records:           {} ({} complete, {} partial)", result.records.len(), complete, partial);
    println!("  failures:          {}", result.failures.len());
    for failure in &result.failures {
        println!("    {}: {}", failure.ticker, failure.error);
    }
    if result.source_unreachable {
        println!("  note: the first batch failed entirely with timeout/network errors; check connectivity");
    }

    println!();
    for record in result.records.iter().take(3) {
        println!("{} ({} fields)", record.ticker, record.len());
        if let Some(value) = record.get("Último Preço de Fechamento") {
            println!("  Último Preço de Fechamento: {:?}", value);
        }
        if let Some(yield_pct) = record.earnings_yield {
            println!("  Earnings Yield (%): {:.2}", yield_pct);
        }
    }

    Ok(())
}

async fn report_progress(mut receiver: broadcast::Receiver<ProgressEvent>) {
    while let Ok(event) = receiver.recv().await {
        match event {
            ProgressEvent::TickerStarted { .. } => {}
            ProgressEvent::TickerCompleted {
                worker_id,
                ticker,
                status,
            } => info!("worker {}: {} -> {:?}", worker_id, ticker, status),
            ProgressEvent::TickerFailed {
                worker_id,
                ticker,
                error,
            } => info!("worker {}: {} failed ({})", worker_id, ticker, error),
            ProgressEvent::BatchCompleted {
                batch_index,
                total_batches,
                records,
                failures,
            } => info!(
                "batch {}/{} complete ({} records, {} failures)",
                batch_index + 1,
                total_batches,
                records,
                failures
            ),
        }
    }
}
