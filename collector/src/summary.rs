// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Quick statistics over a loaded snapshot table.

use std::collections::BTreeSet;
use std::fmt;

use arrow::array::{Array, Float64Array, StringArray, TimestampMillisecondArray};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};

#[derive(Debug, Default, PartialEq)]
pub struct TableSummary {
    pub rows: usize,
    pub instruments: usize,
    pub calls: usize,
    pub puts: usize,
    pub expirations: usize,
    pub strikes: usize,
    pub min_strike: Option<f64>,
    pub max_strike: Option<f64>,
    pub timestamps: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

fn strings<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch.column_by_name(name)?.as_any().downcast_ref()
}

fn millis<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a TimestampMillisecondArray> {
    batch.column_by_name(name)?.as_any().downcast_ref()
}

impl TableSummary {
    pub fn from_batch(batch: &RecordBatch) -> Self {
        let mut summary = TableSummary {
            rows: batch.num_rows(),
            ..Default::default()
        };
        if let Some(names) = strings(batch, "instrument_name") {
            let distinct: BTreeSet<&str> = names.iter().flatten().collect();
            summary.instruments = distinct.len();
        }
        if let Some(types) = strings(batch, "option_type") {
            for value in types.iter().flatten() {
                match value {
                    "call" => summary.calls += 1,
                    "put" => summary.puts += 1,
                    _ => {}
                }
            }
        }
        if let Some(expirations) = millis(batch, "expiration_timestamp") {
            let distinct: BTreeSet<i64> = expirations.iter().flatten().collect();
            summary.expirations = distinct.len();
        }
        if let Some(strikes) = batch
            .column_by_name("strike")
            .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
        {
            let distinct: BTreeSet<u64> = strikes.iter().flatten().map(f64::to_bits).collect();
            summary.strikes = distinct.len();
            summary.min_strike = strikes.iter().flatten().reduce(f64::min);
            summary.max_strike = strikes.iter().flatten().reduce(f64::max);
        }
        if let Some(stamps) = millis(batch, "timestamp") {
            let distinct: BTreeSet<i64> = stamps.iter().flatten().collect();
            summary.timestamps = distinct.len();
            summary.first = distinct
                .first()
                .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(*ms));
            summary.last = distinct
                .last()
                .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(*ms));
        }
        summary
    }
}

impl fmt::Display for TableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "rows:         {}", self.rows)?;
        writeln!(f, "instruments:  {}", self.instruments)?;
        writeln!(f, "calls/puts:   {}/{}", self.calls, self.puts)?;
        writeln!(f, "expirations:  {}", self.expirations)?;
        match (self.min_strike, self.max_strike) {
            (Some(min), Some(max)) => {
                writeln!(f, "strikes:      {} ({} - {})", self.strikes, min, max)?
            }
            _ => writeln!(f, "strikes:      0")?,
        }
        write!(f, "timestamps:   {}", self.timestamps)?;
        if let (Some(first), Some(last)) = (self.first, self.last) {
            write!(f, " ({} .. {})", first.to_rfc3339(), last.to_rfc3339())?;
        }
        Ok(())
    }
}
