#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `safety_metrics`: computes neighborhood safety scores from incident
//! data, uploads them, and links them to points of interest.
//!
//! Logs go through `indicatif-log-bridge` (via
//! [`safety_metrics_cli_utils::init_logger`]) so progress bars and log
//! lines share the terminal.

mod progress;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use safety_metrics_geoindex::HttpGeoIndex;
use safety_metrics_pipeline::{Pipeline, RunConfig, RunSummary};
use safety_metrics_scoring::registry;
use safety_metrics_scoring_models::MetricDefinition;
use safety_metrics_store::{MetricStore, RestMetricStore};

use crate::progress::TerminalProgress;

#[derive(Parser)]
#[command(name = "safety_metrics", about = "Neighborhood safety score pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute, upload, and link safety metrics for every selected scope
    Run {
        /// Run config TOML
        #[arg(long)]
        config: PathBuf,
        /// Comma-separated scope ids (overrides `SAFETY_METRICS_SCOPES` env var)
        #[arg(long)]
        scopes: Option<String>,
        /// Compute everything but skip all writes
        #[arg(long)]
        dry_run: bool,
    },
    /// Recompute POI scores from metric records already in the store
    Link {
        /// Run config TOML
        #[arg(long)]
        config: PathBuf,
        /// Comma-separated scope ids (overrides `SAFETY_METRICS_SCOPES` env var)
        #[arg(long)]
        scopes: Option<String>,
        /// Compute scores but skip the POI updates
        #[arg(long)]
        dry_run: bool,
    },
    /// List metric definitions (built-in unless the config overrides them)
    Metrics {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List configured scopes and their sources
    Scopes {
        #[arg(long)]
        config: PathBuf,
    },
    /// Check the config, including code mappings for every scope
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = safety_metrics_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            scopes,
            dry_run,
        } => {
            let config = RunConfig::load(&config).await?;
            let index = HttpGeoIndex::new(
                &config.geo_index,
                config.api_key.clone(),
                config.retry.policy(),
                config.retry.rate_limiter(),
            )?;
            let store = open_store(&config, dry_run)?;
            let progress = TerminalProgress::new(multi);
            let pipeline = Pipeline::new(
                &config,
                store.as_ref().map(|s| s as &dyn MetricStore),
                &progress,
                dry_run,
            )?;
            report(&pipeline.run(&index, scopes).await)?;
        }
        Commands::Link {
            config,
            scopes,
            dry_run,
        } => {
            let config = RunConfig::load(&config).await?;
            let store = store_client(&config)?;
            let progress = TerminalProgress::new(multi);
            let pipeline = Pipeline::new(&config, Some(&store), &progress, dry_run)?;
            report(&pipeline.relink(scopes).await)?;
        }
        Commands::Metrics { config } => {
            let metrics = match config {
                Some(path) => RunConfig::load(&path).await?.metric_definitions()?,
                None => registry::all_metrics()?,
            };
            print_metrics(&metrics);
        }
        Commands::Scopes { config } => {
            let config = RunConfig::load(&config).await?;
            print_scopes(&config);
        }
        Commands::Validate { config } => validate(&config).await?,
    }

    Ok(())
}

fn store_client(config: &RunConfig) -> Result<RestMetricStore, Box<dyn std::error::Error>> {
    Ok(RestMetricStore::new(
        &config.store,
        config.api_key.clone(),
        config.retry.policy(),
        config.retry.rate_limiter(),
    )?)
}

/// A dry run works without a store; it then skips POI linking.
fn open_store(
    config: &RunConfig,
    dry_run: bool,
) -> Result<Option<RestMetricStore>, Box<dyn std::error::Error>> {
    if dry_run && config.store.base_url.trim().is_empty() {
        log::warn!("No store configured; POI linking will be skipped");
        return Ok(None);
    }
    store_client(config).map(Some)
}

fn report(summary: &RunSummary) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Run summary:\n{}", summary.to_json()?);
    let failed = summary.failed_scopes();
    if !failed.is_empty() {
        log::warn!("Scopes with problems: {}", failed.join(", "));
    }
    Ok(())
}

fn print_metrics(metrics: &[MetricDefinition]) {
    println!("{:<12} {:<14} QUESTION", "ID", "HOURS");
    println!("{}", "-".repeat(70));
    for metric in metrics {
        let hours = metric.hours.as_ref().map_or_else(
            || "all".to_string(),
            |filter| {
                filter
                    .0
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            },
        );
        println!("{:<12} {:<14} {}", metric.id, hours, metric.question);
    }
}

fn print_scopes(config: &RunConfig) {
    println!("{:<20} {:<24} {:>8} SOURCES", "ID", "NAME", "RADIUS");
    println!("{}", "-".repeat(70));
    for scope in &config.scopes {
        let sources = scope
            .sources
            .iter()
            .map(|s| s.id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:<20} {:<24} {:>7}m {sources}",
            scope.id,
            scope.name(),
            scope.neighbor_radius_m
        );
    }
}

async fn validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = RunConfig::load(path).await?;
    let metrics = config.metric_definitions()?;
    let mut problems = Vec::new();

    for scope in &config.scopes {
        if let Err(e) = scope.validate(&metrics) {
            problems.push(e.to_string());
            continue;
        }
        for source in &scope.sources {
            match config.records_path(scope, source) {
                Ok(records) if !records.exists() => problems.push(format!(
                    "Source '{}' in scope '{}': {} does not exist",
                    source.id,
                    scope.id,
                    records.display()
                )),
                Ok(_) => {}
                Err(e) => problems.push(e.to_string()),
            }
        }
    }

    if problems.is_empty() {
        log::info!(
            "{} OK: {} scopes, {} metrics",
            path.display(),
            config.scopes.len(),
            metrics.len()
        );
        return Ok(());
    }
    for problem in &problems {
        log::error!("{problem}");
    }
    Err(format!("{} problems in {}", problems.len(), path.display()).into())
}
