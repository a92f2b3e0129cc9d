// Copyright (c) James Kassemi, SC, US. All rights reserved.

use deribit_source::SourceError;
use storage::AppendError;
use thiserror::Error;

/// Failures that abort a single collection cycle.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("instrument directory unavailable: {0}")]
    DirectoryUnavailable(String),
    #[error("spot price unavailable: {0}")]
    SpotPriceUnavailable(#[source] SourceError),
    #[error(transparent)]
    Storage(#[from] AppendError),
    #[error("storage task failed: {0}")]
    StorageTask(String),
}

/// One instrument whose order book could not be fetched. Recorded and skipped.
#[derive(Debug, Error)]
#[error("{instrument_name}: {error} after {attempts} attempt(s)")]
pub struct InstrumentFetchFailed {
    pub instrument_name: String,
    pub attempts: usize,
    #[source]
    pub error: SourceError,
}
