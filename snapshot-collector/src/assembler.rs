// Copyright (c) James Kassemi, SC, US. All rights reserved.

use chrono::{DateTime, Utc};
use core_types::types::{mid_price, truncate_to_millis, OptionState, SnapshotRow};

/// One row per state, in input order, stamped with the cycle timestamp and spot price.
pub fn assemble(timestamp: DateTime<Utc>, spot_price: f64, states: &[OptionState]) -> Vec<SnapshotRow> {
    let timestamp = truncate_to_millis(timestamp);
    states
        .iter()
        .map(|state| assemble_row(timestamp, spot_price, state))
        .collect()
}

fn assemble_row(timestamp: DateTime<Utc>, spot_price: f64, state: &OptionState) -> SnapshotRow {
    let instrument = &state.instrument;
    let market = &state.market;
    SnapshotRow {
        timestamp,
        instrument_name: instrument.instrument_name.clone(),
        currency: instrument.currency.clone(),
        expiration: instrument.expiration,
        strike: instrument.strike,
        option_type: instrument.option_type,
        mark_price: market.mark_price,
        last_price: market.last_price,
        bid_price: market.bid_price,
        ask_price: market.ask_price,
        mid_price: mid_price(market.bid_price, market.ask_price),
        delta: market.delta,
        gamma: market.gamma,
        vega: market.vega,
        theta: market.theta,
        rho: market.rho,
        mark_iv: market.mark_iv,
        bid_iv: market.bid_iv,
        ask_iv: market.ask_iv,
        open_interest: market.open_interest,
        volume_24h: market.volume_24h,
        underlying_price: market.underlying_price,
        underlying_index: market.underlying_index.clone(),
        spot_price,
    }
}
