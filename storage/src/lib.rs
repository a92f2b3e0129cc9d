// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Date-partitioned Parquet storage for option snapshots.
//!
//! One file per currency per UTC date. Appends are read-merge-rewrite transactions scoped
//! to a single partition: existing rows and new rows are merged, deduplicated on
//! `(instrument_name, timestamp)` with the newest version winning, and the partition is
//! rewritten in full through a temporary file.

mod batch;
mod error;

pub use batch::rows_to_batch;
pub use error::{AppendError, PartitionFailure, StorageError};

use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    path::{Path, PathBuf},
};

use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use core_types::types::SnapshotRow;
use log::{debug, error, info};
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::properties::WriterProperties,
};

const PARTITION_EXTENSION: &str = "parquet";
const DATE_FORMAT: &str = "%Y%m%d";

/// Outcome of merging one date's rows into its partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionWrite {
    pub date: NaiveDate,
    pub path: PathBuf,
    pub rows_received: usize,
    /// Keys that were not present in the partition before this append.
    pub rows_added: usize,
    pub total_rows: usize,
}

pub struct PartitionedStore {
    root: PathBuf,
    currency: String,
}

impl PartitionedStore {
    /// Opens (creating if needed) the data directory for `currency`.
    pub fn open(root: impl Into<PathBuf>, currency: impl Into<String>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            currency: currency.into().to_ascii_uppercase(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_prefix(&self) -> String {
        format!("{}_options_", self.currency)
    }

    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!(
            "{}{}.{PARTITION_EXTENSION}",
            self.file_prefix(),
            date.format(DATE_FORMAT)
        ))
    }

    fn partition_date(&self, file_name: &str) -> Option<NaiveDate> {
        let stem = file_name
            .strip_prefix(&self.file_prefix())?
            .strip_suffix(&format!(".{PARTITION_EXTENSION}"))?;
        NaiveDate::parse_from_str(stem, DATE_FORMAT).ok()
    }

    /// Existing partitions for this currency, oldest first.
    pub fn partitions(&self) -> Result<Vec<(NaiveDate, PathBuf)>, StorageError> {
        let io_err = |source| StorageError::Io {
            path: self.root.clone(),
            source,
        };
        let mut partitions = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let name = entry.file_name();
            let Some(date) = name.to_str().and_then(|n| self.partition_date(n)) else {
                continue;
            };
            partitions.push((date, entry.path()));
        }
        partitions.sort_by_key(|(date, _)| *date);
        Ok(partitions)
    }

    /// Merges `rows` into their UTC-date partitions.
    ///
    /// Every date is handled independently; when some dates fail the error still reports
    /// the partitions that were written.
    pub fn append(&self, rows: &[SnapshotRow]) -> Result<Vec<PartitionWrite>, AppendError> {
        let mut by_date: BTreeMap<NaiveDate, Vec<SnapshotRow>> = BTreeMap::new();
        for row in rows {
            by_date
                .entry(row.timestamp.date_naive())
                .or_default()
                .push(row.clone());
        }
        let mut written = Vec::with_capacity(by_date.len());
        let mut failures = Vec::new();
        for (date, date_rows) in by_date {
            match self.append_partition(date, date_rows) {
                Ok(write) => {
                    info!(
                        "{}: merged {} rows ({} new) into {:?}, {} rows total",
                        date, write.rows_received, write.rows_added, write.path, write.total_rows
                    );
                    written.push(write);
                }
                Err(err) => {
                    error!("append for partition {} failed: {}", date, err);
                    failures.push(PartitionFailure { date, error: err });
                }
            }
        }
        if failures.is_empty() {
            Ok(written)
        } else {
            Err(AppendError { written, failures })
        }
    }

    fn append_partition(
        &self,
        date: NaiveDate,
        rows: Vec<SnapshotRow>,
    ) -> Result<PartitionWrite, StorageError> {
        let path = self.partition_path(date);
        let existing = if path.is_file() {
            read_partition(&path)?
        } else {
            debug!("creating partition {:?}", path);
            Vec::new()
        };
        let rows_received = rows.len();
        let existing_rows = existing.len();
        let merged = merge_rows(existing, rows);
        let total_rows = merged.len();
        write_partition(&path, &merged)?;
        Ok(PartitionWrite {
            date,
            path,
            rows_received,
            rows_added: total_rows.saturating_sub(existing_rows),
            total_rows,
        })
    }

    /// Rows of every partition whose date lies in the inclusive `[start, end]` range.
    pub fn load_rows(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<SnapshotRow>, StorageError> {
        let mut rows = Vec::new();
        for (date, path) in self.partitions()? {
            if start.is_some_and(|s| date < s) || end.is_some_and(|e| date > e) {
                continue;
            }
            let mut partition = read_partition(&path)?;
            debug!("loaded {} rows from {:?}", partition.len(), path);
            rows.append(&mut partition);
        }
        Ok(rows)
    }

    /// Concatenated table for the range. An empty range yields an empty batch that still
    /// carries the full schema.
    pub fn load(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<RecordBatch, StorageError> {
        let rows = self.load_rows(start, end)?;
        Ok(rows_to_batch(&rows)?)
    }
}

/// Existing rows first, then incoming; the later version of a key replaces the earlier one.
fn merge_rows(existing: Vec<SnapshotRow>, incoming: Vec<SnapshotRow>) -> Vec<SnapshotRow> {
    let mut by_key: HashMap<(String, i64), SnapshotRow> =
        HashMap::with_capacity(existing.len() + incoming.len());
    for row in existing.into_iter().chain(incoming) {
        let (name, millis) = row.key();
        by_key.insert((name.to_string(), millis), row);
    }
    let mut merged: Vec<SnapshotRow> = by_key.into_values().collect();
    merged.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.instrument_name.cmp(&b.instrument_name))
    });
    merged
}

fn read_partition(path: &Path) -> Result<Vec<SnapshotRow>, StorageError> {
    let file = File::open(path).map_err(|err| StorageError::corrupt(path, err))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|builder| builder.build())
        .map_err(|err| StorageError::corrupt(path, err))?;
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|err| StorageError::corrupt(path, err))?;
        rows.extend(batch::batch_to_rows(&batch).map_err(|reason| StorageError::corrupt(path, reason))?);
    }
    Ok(rows)
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build()
}

fn write_partition(path: &Path, rows: &[SnapshotRow]) -> Result<(), StorageError> {
    let batch = rows_to_batch(rows).map_err(|err| StorageError::write_failed(path, err))?;
    let tmp_path = path.with_extension(format!("{PARTITION_EXTENSION}.tmp"));
    let result = write_batch(&tmp_path, &batch).and_then(|_| {
        fs::rename(&tmp_path, path).map_err(|err| StorageError::write_failed(path, err))
    });
    if result.is_err() && tmp_path.is_file() {
        if let Err(err) = fs::remove_file(&tmp_path) {
            error!("failed to remove temporary partition {:?}: {}", tmp_path, err);
        }
    }
    result
}

fn write_batch(tmp_path: &Path, batch: &RecordBatch) -> Result<(), StorageError> {
    let file = File::create(tmp_path).map_err(|err| StorageError::write_failed(tmp_path, err))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_properties()))
        .map_err(|err| StorageError::write_failed(tmp_path, err))?;
    writer
        .write(batch)
        .map_err(|err| StorageError::write_failed(tmp_path, err))?;
    writer
        .close()
        .map_err(|err| StorageError::write_failed(tmp_path, err))?;
    Ok(())
}
