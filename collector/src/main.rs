// Copyright (c) James Kassemi, SC, US. All rights reserved.

mod summary;

use std::{env, process, sync::Arc};

use chrono::NaiveDate;
use config::ConfigError;
use core_types::config::CollectorConfig;
use deribit_source::{DeribitClient, SourceError};
use log::info;
use snapshot_collector::{scheduler, CollectorError, CollectorMetrics, SnapshotCollector};
use storage::{PartitionedStore, StorageError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use summary::TableSummary;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("collector failed: {err}");
        process::exit(1);
    }
}

enum Command {
    Collect,
    Run,
    Load {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

fn parse_command() -> Result<Command, AppError> {
    let mut args = env::args().skip(1);
    let command = args.next().ok_or(AppError::Usage)?;
    match command.as_str() {
        "collect" => Ok(Command::Collect),
        "run" => Ok(Command::Run),
        "load" => {
            let start = args.next().map(|s| parse_date(&s)).transpose()?;
            let end = args.next().map(|s| parse_date(&s)).transpose()?;
            Ok(Command::Load { start, end })
        }
        _ => Err(AppError::Usage),
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| AppError::InvalidDate(value.to_string()))
}

fn run() -> Result<(), AppError> {
    let command = parse_command()?;
    let config = CollectorConfig::load()?;
    let store = Arc::new(PartitionedStore::open(&config.data_dir, &config.currency)?);
    info!("{} options store at {:?}", config.currency, store.root());

    match command {
        Command::Load { start, end } => load(&store, start, end),
        Command::Collect => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(collect(&config, store))
        }
        Command::Run => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_scheduler(&config, store))
        }
    }
}

fn build_collector(
    config: &CollectorConfig,
    store: Arc<PartitionedStore>,
    metrics: CollectorMetrics,
) -> Result<SnapshotCollector, AppError> {
    let client = DeribitClient::new(&config.rest_base_url, config.request_timeout())?;
    Ok(SnapshotCollector::from_config(
        config,
        Arc::new(client),
        store,
        metrics,
    ))
}

async fn collect(config: &CollectorConfig, store: Arc<PartitionedStore>) -> Result<(), AppError> {
    let collector = build_collector(config, store, CollectorMetrics::new())?;
    let report = collector.collect_once().await?;
    println!(
        "{} snapshot at {}: {} rows from {} instruments (spot {}), {} skipped",
        collector.currency(),
        report.timestamp.to_rfc3339(),
        report.rows_written,
        report.instruments,
        report.spot_price,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  skipped {failure}");
    }
    for partition in &report.partitions {
        println!(
            "  {}: {} rows stored ({} new) in {}",
            partition.date,
            partition.total_rows,
            partition.rows_added,
            partition.path.display()
        );
    }
    Ok(())
}

async fn run_scheduler(
    config: &CollectorConfig,
    store: Arc<PartitionedStore>,
) -> Result<(), AppError> {
    let metrics = CollectorMetrics::new();
    let collector = Arc::new(build_collector(config, store, metrics.clone())?);
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            info!("shutdown requested; stopping after the current cycle");
            cancel.cancel();
        })?;
    }
    info!(
        "collecting {} every {:?} ({:?} iterations); press Ctrl+C to stop",
        config.currency,
        config.interval(),
        config.iterations
    );
    let summary = scheduler::run(
        collector,
        config.interval(),
        config.iterations,
        cancel,
        metrics.clone(),
    )
    .await;
    let snapshot = metrics.snapshot();
    info!(
        "run finished: {} cycles ({} ok, {} failed), {} instruments requested, {} skipped, {} retries, {} rows written, last cycle {} ms",
        summary.cycles_run,
        summary.cycles_succeeded,
        summary.cycles_failed,
        snapshot.instruments_requested,
        snapshot.instrument_failures,
        snapshot.retries,
        snapshot.rows_written,
        snapshot.last_cycle_duration_ms
    );
    Ok(())
}

fn load(
    store: &PartitionedStore,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), AppError> {
    let table = store.load(start, end)?;
    println!("{} rows x {} columns", table.num_rows(), table.num_columns());
    println!("{}", TableSummary::from_batch(&table));
    Ok(())
}

#[derive(Debug, Error)]
enum AppError {
    #[error("usage: collector <collect|run|load [START] [END]>")]
    Usage,
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("failed to install Ctrl+C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}
