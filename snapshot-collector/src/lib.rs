// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Periodic option snapshot collection: list instruments, fetch their order books under a
//! pacing budget, assemble rows and merge them into the partitioned store.

mod assembler;
mod directory;
mod error;
mod fetcher;
mod metrics;
pub mod scheduler;
#[cfg(test)]
mod testing;

pub use assembler::assemble;
pub use directory::InstrumentDirectory;
pub use error::{CollectorError, InstrumentFetchFailed};
pub use fetcher::{FetchReport, PacingPolicy, SnapshotFetcher};
pub use metrics::{CollectorMetrics, CollectorMetricsSnapshot};
pub use scheduler::{Cycle, RunSummary};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use core_types::config::CollectorConfig;
use core_types::retry::RetryPolicy;
use core_types::types::{truncate_to_millis, SnapshotRow};
use deribit_source::{index_name_for, ExchangeClient, SourceError};
use log::{info, warn};
use storage::{PartitionWrite, PartitionedStore};

/// Rows of one cycle before they are persisted.
#[derive(Debug)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub spot_price: f64,
    pub instruments: usize,
    pub rows: Vec<SnapshotRow>,
    pub failures: Vec<InstrumentFetchFailed>,
}

#[derive(Debug)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub spot_price: f64,
    pub instruments: usize,
    pub rows_written: usize,
    pub failures: Vec<InstrumentFetchFailed>,
    pub partitions: Vec<PartitionWrite>,
}

/// Source of cycle timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct SnapshotCollector {
    currency: String,
    clock: Clock,
    client: Arc<dyn ExchangeClient>,
    directory: InstrumentDirectory,
    fetcher: SnapshotFetcher,
    retry: RetryPolicy,
    store: Arc<PartitionedStore>,
    metrics: CollectorMetrics,
}

impl SnapshotCollector {
    pub fn new(
        currency: impl Into<String>,
        client: Arc<dyn ExchangeClient>,
        store: Arc<PartitionedStore>,
        pacing: PacingPolicy,
        retry: RetryPolicy,
        metrics: CollectorMetrics,
    ) -> Self {
        Self {
            currency: currency.into().to_ascii_uppercase(),
            clock: Arc::new(Utc::now),
            directory: InstrumentDirectory::new(client.clone(), retry.clone()),
            fetcher: SnapshotFetcher::new(client.clone(), pacing, retry.clone(), metrics.clone()),
            client,
            retry,
            store,
            metrics,
        }
    }

    pub fn from_config(
        cfg: &CollectorConfig,
        client: Arc<dyn ExchangeClient>,
        store: Arc<PartitionedStore>,
        metrics: CollectorMetrics,
    ) -> Self {
        Self::new(
            cfg.currency.clone(),
            client,
            store,
            PacingPolicy::from(&cfg.pacing),
            RetryPolicy::from(&cfg.retry),
            metrics,
        )
    }

    /// Replaces the wall clock used to stamp cycles.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn metrics(&self) -> &CollectorMetrics {
        &self.metrics
    }

    async fn spot_price(&self) -> Result<f64, CollectorError> {
        let index_name = index_name_for(&self.currency);
        self.retry
            .retry_async_if(SourceError::is_retryable, |_| {
                self.client.index_price(&index_name)
            })
            .await
            .map_err(CollectorError::SpotPriceUnavailable)
    }

    /// Directory, spot price, order books and assembly. Nothing is written.
    pub async fn collect_snapshot(&self) -> Result<Snapshot, CollectorError> {
        let timestamp = truncate_to_millis((self.clock)());
        let instruments = self
            .directory
            .list_active_instruments(&self.currency)
            .await?;
        let spot_price = self.spot_price().await?;
        info!(
            "{}: fetching {} order books (spot {})",
            self.currency,
            instruments.len(),
            spot_price
        );
        let report = self.fetcher.fetch_all(&instruments).await;
        if !report.failures.is_empty() {
            warn!(
                "{}: {} of {} instruments skipped",
                self.currency,
                report.failures.len(),
                instruments.len()
            );
        }
        let rows = assemble(timestamp, spot_price, &report.states);
        Ok(Snapshot {
            timestamp,
            spot_price,
            instruments: instruments.len(),
            rows,
            failures: report.failures,
        })
    }

    /// One full cycle, persisted.
    pub async fn collect_once(&self) -> Result<CycleReport, CollectorError> {
        let snapshot = self.collect_snapshot().await?;
        let rows_written = snapshot.rows.len();
        let store = self.store.clone();
        let rows = snapshot.rows;
        let partitions = tokio::task::spawn_blocking(move || store.append(&rows))
            .await
            .map_err(|err| CollectorError::StorageTask(err.to_string()))??;
        self.metrics.record_rows_written(rows_written);
        Ok(CycleReport {
            timestamp: snapshot.timestamp,
            spot_price: snapshot.spot_price,
            instruments: snapshot.instruments,
            rows_written,
            failures: snapshot.failures,
            partitions,
        })
    }
}

#[async_trait::async_trait]
impl Cycle for SnapshotCollector {
    async fn run_cycle(&self) -> Result<CycleReport, CollectorError> {
        self.collect_once().await
    }
}
