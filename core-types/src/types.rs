// Copyright (c) James Kassemi, SC, US. All rights reserved.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Call/put flag as listed by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Call => "call",
            OptionType::Put => "put",
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOptionType(pub String);

impl fmt::Display for UnknownOptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown option type '{}'", self.0)
    }
}

impl std::error::Error for UnknownOptionType {}

impl FromStr for OptionType {
    type Err = UnknownOptionType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "call" => Ok(OptionType::Call),
            "put" => Ok(OptionType::Put),
            other => Err(UnknownOptionType(other.to_string())),
        }
    }
}

/// An active option listing. Immutable once listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub instrument_name: String,
    pub currency: String,
    pub strike: f64,
    pub expiration: DateTime<Utc>,
    pub option_type: OptionType,
}

/// Market state for one instrument as reported by a single order book request.
///
/// Every market field is optional: `None` means the exchange did not report it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketFields {
    pub mark_price: Option<f64>,
    pub last_price: Option<f64>,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub vega: Option<f64>,
    pub theta: Option<f64>,
    pub rho: Option<f64>,
    pub mark_iv: Option<f64>,
    pub bid_iv: Option<f64>,
    pub ask_iv: Option<f64>,
    pub open_interest: Option<f64>,
    pub volume_24h: Option<f64>,
    pub underlying_price: Option<f64>,
    pub underlying_index: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionState {
    pub instrument: Instrument,
    pub market: MarketFields,
}

/// One stored record: one instrument in one collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub timestamp: DateTime<Utc>,
    pub instrument_name: String,
    pub currency: String,
    pub expiration: DateTime<Utc>,
    pub strike: f64,
    pub option_type: OptionType,
    pub mark_price: Option<f64>,
    pub last_price: Option<f64>,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub mid_price: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub vega: Option<f64>,
    pub theta: Option<f64>,
    pub rho: Option<f64>,
    pub mark_iv: Option<f64>,
    pub bid_iv: Option<f64>,
    pub ask_iv: Option<f64>,
    pub open_interest: Option<f64>,
    pub volume_24h: Option<f64>,
    pub underlying_price: Option<f64>,
    pub underlying_index: Option<String>,
    pub spot_price: f64,
}

impl SnapshotRow {
    /// Deduplication key within a partition.
    pub fn key(&self) -> (&str, i64) {
        (self.instrument_name.as_str(), self.timestamp.timestamp_millis())
    }
}

/// `(bid + ask) / 2`, defined only when both sides are quoted.
pub fn mid_price(bid: Option<f64>, ask: Option<f64>) -> Option<f64> {
    match (bid, ask) {
        (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
        _ => None,
    }
}

/// Truncates to the millisecond precision used on disk.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(ts)
}
