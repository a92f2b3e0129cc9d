// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! In-memory exchange used by the collector tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use core_types::types::{Instrument, OptionType};
use deribit_source::{
    ExchangeClient, GreeksRecord, InstrumentRecord, OrderBookRecord, SourceError, StatsRecord,
};
use tokio::time::Instant;

const EXPIRY_MS: i64 = 1_711_699_200_000;

pub(crate) fn listing(name: &str) -> InstrumentRecord {
    let parts: Vec<&str> = name.split('-').collect();
    InstrumentRecord {
        instrument_name: Some(name.to_string()),
        kind: Some("option".to_string()),
        base_currency: Some("BTC".to_string()),
        strike: parts.get(2).and_then(|s| s.parse().ok()),
        expiration_timestamp: Some(EXPIRY_MS),
        option_type: parts
            .get(3)
            .map(|t| if *t == "C" { "call" } else { "put" }.to_string()),
        is_active: Some(true),
    }
}

fn name_at(idx: usize) -> String {
    format!("BTC-29MAR24-{}-C", 30_000 + idx * 1_000)
}

pub(crate) fn listings(count: usize) -> Vec<InstrumentRecord> {
    (0..count).map(|idx| listing(&name_at(idx))).collect()
}

pub(crate) fn instruments(count: usize) -> Vec<Instrument> {
    (0..count)
        .map(|idx| Instrument {
            instrument_name: name_at(idx),
            currency: "BTC".to_string(),
            strike: (30_000 + idx * 1_000) as f64,
            expiration: DateTime::<Utc>::from_timestamp_millis(EXPIRY_MS).unwrap(),
            option_type: OptionType::Call,
        })
        .collect()
}

fn sample_book() -> OrderBookRecord {
    OrderBookRecord {
        instrument_name: None,
        timestamp: Some(1_700_000_000_000),
        mark_price: Some(0.045),
        last_price: Some(0.044),
        best_bid_price: Some(0.0625),
        best_ask_price: Some(0.09375),
        greeks: Some(GreeksRecord {
            delta: Some(0.5),
            gamma: Some(0.00003),
            vega: Some(80.0),
            theta: Some(-25.0),
            rho: Some(30.0),
        }),
        mark_iv: Some(55.0),
        bid_iv: Some(54.0),
        ask_iv: Some(56.0),
        open_interest: Some(300.0),
        stats: Some(StatsRecord {
            volume: Some(12.0),
            ..Default::default()
        }),
        underlying_price: Some(64_100.0),
        underlying_index: Some("BTC-29MAR24".to_string()),
        index_price: Some(64_000.0),
    }
}

pub(crate) struct FakeExchange {
    listings: Vec<InstrumentRecord>,
    book: OrderBookRecord,
    failing: HashSet<String>,
    directory_down: bool,
    spot: Option<f64>,
    rate_limited_calls: usize,
    order_book_calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl Default for FakeExchange {
    fn default() -> Self {
        Self {
            listings: Vec::new(),
            book: sample_book(),
            failing: HashSet::new(),
            directory_down: false,
            spot: Some(64_000.0),
            rate_limited_calls: 0,
            order_book_calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }
}

impl FakeExchange {
    pub(crate) fn with_listings(listings: Vec<InstrumentRecord>) -> Self {
        Self {
            listings,
            ..Default::default()
        }
    }

    pub(crate) fn failing(mut self, names: &[&str]) -> Self {
        self.failing = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub(crate) fn with_book(mut self, edit: impl FnOnce(&mut OrderBookRecord)) -> Self {
        edit(&mut self.book);
        self
    }

    pub(crate) fn rate_limited_first(mut self, calls: usize) -> Self {
        self.rate_limited_calls = calls;
        self
    }

    pub(crate) fn directory_down(mut self) -> Self {
        self.directory_down = true;
        self
    }

    pub(crate) fn spot_down(mut self) -> Self {
        self.spot = None;
        self
    }

    pub(crate) fn order_book_calls(&self) -> usize {
        self.order_book_calls.load(Ordering::SeqCst)
    }

    /// Number of order book calls issued at each distinct instant, in time order.
    pub(crate) fn calls_per_instant(&self) -> Vec<usize> {
        let times = self.call_times.lock().unwrap();
        let mut counts: Vec<(Instant, usize)> = Vec::new();
        for at in times.iter() {
            match counts.last_mut() {
                Some((last, count)) if last == at => *count += 1,
                _ => counts.push((*at, 1)),
            }
        }
        counts.into_iter().map(|(_, count)| count).collect()
    }
}

#[async_trait::async_trait]
impl ExchangeClient for FakeExchange {
    async fn list_instruments(&self, _currency: &str) -> Result<Vec<InstrumentRecord>, SourceError> {
        if self.directory_down {
            return Err(SourceError::HttpStatus(503));
        }
        Ok(self.listings.clone())
    }

    async fn order_book(&self, instrument_name: &str) -> Result<OrderBookRecord, SourceError> {
        let call = self.order_book_calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        if call < self.rate_limited_calls {
            return Err(SourceError::RateLimited("too_many_requests".to_string()));
        }
        if self.failing.contains(instrument_name) {
            return Err(SourceError::Api {
                code: 13020,
                message: "not_found".to_string(),
            });
        }
        let mut book = self.book.clone();
        book.instrument_name = Some(instrument_name.to_string());
        Ok(book)
    }

    async fn index_price(&self, _index_name: &str) -> Result<f64, SourceError> {
        self.spot.ok_or(SourceError::HttpStatus(502))
    }
}
