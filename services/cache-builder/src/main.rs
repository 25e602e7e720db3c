//! Solar X-ray flux tile cache builder.
//!
//! Builds the diagram tile pyramid from ingested samples, extends it as new
//! data arrives, and feeds the sample store from local or downloaded GOES
//! CSV files.

mod config;
mod download;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{Overrides, Settings};
use download::{parse_month, DownloadConfig, MonthDownloader};
use ingestion::{IngestOptions, Ingester, IngestionResult};
use pyramid::{PyramidBuilder, SampleDiagramSource, SweepReport};
use storage::{FsTileStore, SampleStore, DEFAULT_MONTH_CAPACITY};
use timelines_common::parse_instant;

#[derive(Parser, Debug)]
#[command(name = "timelines-cache")]
#[command(about = "Builds and extends the solar X-ray flux diagram tile cache")]
struct Args {
    /// YAML configuration file
    #[arg(long, global = true, env = "TIMELINES_CONFIG")]
    config: Option<PathBuf>,

    /// Root of the sample store
    #[arg(long, global = true)]
    data_path: Option<PathBuf>,

    /// Root of the tile cache
    #[arg(long, global = true)]
    cache_path: Option<PathBuf>,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build every level from the dataset start
    Create,
    /// Rebuild the newest tile of every level and extend to now
    Update {
        /// Repeat every this many seconds until interrupted
        #[arg(long)]
        every: Option<u64>,
    },
    /// Parse GOES XRS CSV files into the sample store
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Drop samples before this instant (RFC 3339 or epoch millis)
        #[arg(long)]
        start: Option<String>,
        /// Drop samples after this instant
        #[arg(long)]
        end: Option<String>,
    },
    /// Download one month of averaged data and ingest it
    Download {
        /// Month to fetch, YYYY-MM
        #[arg(long)]
        month: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, args.json)?;

    let settings = Settings::load(&Overrides {
        config: args.config.clone(),
        data_path: args.data_path.clone(),
        cache_path: args.cache_path.clone(),
    })?;
    info!(
        cache_path = %settings.pyramid.cache_path.display(),
        data_path = %settings.data_path.display(),
        zoom_min = settings.pyramid.zoom_min,
        zoom_max = settings.pyramid.zoom_max,
        "Loaded configuration"
    );

    let samples = Arc::new(SampleStore::new(&settings.data_path, DEFAULT_MONTH_CAPACITY));

    match args.command {
        Command::Create => {
            let builder = pyramid_builder(&settings, samples)?;
            let report = builder.create_cache().await?;
            print_report(&report)?;
        }
        Command::Update { every: None } => {
            let builder = pyramid_builder(&settings, samples)?;
            let report = builder.update_cache().await?;
            print_report(&report)?;
        }
        Command::Update { every: Some(secs) } => {
            let builder = pyramid_builder(&settings, samples)?;
            run_updates(&builder, Duration::from_secs(secs.max(1))).await;
        }
        Command::Ingest { files, start, end } => {
            let options = ingest_options(start.as_deref(), end.as_deref())?;
            let ingester = Ingester::new(samples);
            for file in &files {
                let result = ingester
                    .ingest_file(file, &options)
                    .await
                    .with_context(|| format!("Failed to ingest {}", file.display()))?;
                log_ingestion(&result);
            }
        }
        Command::Download { month } => {
            let month = parse_month(&month)?;
            let downloader = MonthDownloader::new(DownloadConfig::default(), Ingester::new(samples))?;
            let result = downloader.download_month(month).await?;
            log_ingestion(&result);
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn pyramid_builder(settings: &Settings, samples: Arc<SampleStore>) -> Result<PyramidBuilder> {
    let config = &settings.pyramid;
    let store = Arc::new(FsTileStore::new(&config.cache_path));
    let source = Arc::new(SampleDiagramSource::new(samples, config.geometry()));
    PyramidBuilder::new(config, store, source).context("Failed to set up cache builder")
}

/// Run `update_cache` on a fixed cadence until Ctrl+C.
///
/// A failed sweep is logged and retried at the next tick.
async fn run_updates(builder: &PyramidBuilder, every: Duration) {
    info!(every_secs = every.as_secs(), "Starting periodic updates");
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                match builder.update_cache().await {
                    Ok(report) => log_report(&report),
                    Err(e) => error!(error = %e, "Cache update failed"),
                }
            }
        }
    }
}

fn ingest_options(start: Option<&str>, end: Option<&str>) -> Result<IngestOptions> {
    let mut options = IngestOptions::default();
    if let Some(start) = start {
        options.start = parse_instant(start).context("Invalid --start")?;
    }
    if let Some(end) = end {
        options.end = parse_instant(end).context("Invalid --end")?;
    }
    if options.start > options.end {
        anyhow::bail!("--start must not be after --end");
    }
    Ok(options)
}

fn log_report(report: &SweepReport) {
    for level in &report.levels {
        info!(
            level = level.level,
            start = %level.start,
            written = level.written,
            skipped = level.skipped,
            failed = level.failed,
            "Level summary"
        );
    }
    info!(
        kind = %report.kind,
        written = report.written(),
        skipped = report.skipped(),
        failed = report.failed(),
        duration_ms = report.elapsed.as_millis(),
        "Sweep finished"
    );
}

/// Log the report and write it to stdout as JSON.
fn print_report(report: &SweepReport) -> Result<()> {
    log_report(report);
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn log_ingestion(result: &IngestionResult) {
    info!(
        source = %result.source,
        stored = result.samples_stored,
        rejected = result.rows_rejected,
        malformed = result.rows_malformed,
        coverage = ?result.coverage,
        "Ingestion complete"
    );
}
