// Copyright (c) James Kassemi, SC, US. All rights reserved.

use chrono::NaiveDate;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::PartitionWrite;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Existing partition could not be read or does not match the snapshot schema.
    /// The file is left untouched.
    #[error("partition {path} is corrupt: {reason}")]
    PartitionCorrupt { path: PathBuf, reason: String },
    /// The rewritten partition could not be persisted; the previous file is still in place.
    #[error("failed to write partition {path}: {reason}")]
    StorageWriteFailed { path: PathBuf, reason: String },
    #[error("data directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl StorageError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StorageError::PartitionCorrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StorageError::StorageWriteFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct PartitionFailure {
    pub date: NaiveDate,
    pub error: StorageError,
}

/// Returned when at least one date of an append failed. Dates listed in `written`
/// were merged and persisted normally.
#[derive(Debug, Error)]
#[error("append failed for {}", describe_failures(.failures))]
pub struct AppendError {
    pub written: Vec<PartitionWrite>,
    pub failures: Vec<PartitionFailure>,
}

fn describe_failures(failures: &[PartitionFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{}: {}", failure.date, failure.error))
        .collect::<Vec<_>>()
        .join("; ")
}
