// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Deribit public API v2 payloads. Every field is optional; validation happens downstream.

use serde::Deserialize;

/// JSON-RPC style envelope wrapping every Deribit response.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub result: Option<T>,
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Entry of `public/get_instruments`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InstrumentRecord {
    pub instrument_name: Option<String>,
    pub kind: Option<String>,
    pub base_currency: Option<String>,
    pub strike: Option<f64>,
    /// Milliseconds since the epoch.
    pub expiration_timestamp: Option<i64>,
    pub option_type: Option<String>,
    pub is_active: Option<bool>,
}

/// Result of `public/get_order_book`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OrderBookRecord {
    pub instrument_name: Option<String>,
    pub timestamp: Option<i64>,
    pub mark_price: Option<f64>,
    pub last_price: Option<f64>,
    pub best_bid_price: Option<f64>,
    pub best_ask_price: Option<f64>,
    pub greeks: Option<GreeksRecord>,
    pub mark_iv: Option<f64>,
    pub bid_iv: Option<f64>,
    pub ask_iv: Option<f64>,
    pub open_interest: Option<f64>,
    pub stats: Option<StatsRecord>,
    pub underlying_price: Option<f64>,
    pub underlying_index: Option<String>,
    pub index_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GreeksRecord {
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub vega: Option<f64>,
    pub theta: Option<f64>,
    pub rho: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatsRecord {
    pub volume: Option<f64>,
    pub volume_usd: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub price_change: Option<f64>,
}

/// Result of `public/get_index_price`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct IndexPriceRecord {
    pub index_price: Option<f64>,
}
