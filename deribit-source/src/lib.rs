// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Deribit public REST client: instrument listing, order book snapshots and index prices.

mod error;
mod wire;

pub use error::{SourceError, RATE_LIMIT_ERROR_CODE};
pub use wire::{GreeksRecord, InstrumentRecord, OrderBookRecord, StatsRecord};

use log::debug;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use wire::{Envelope, IndexPriceRecord};

const API_PREFIX: &str = "/api/v2/public";
const USER_AGENT: &str = concat!("deribit-options-collector/", env!("CARGO_PKG_VERSION"));

/// Read-only exchange contract consumed by the collector.
#[async_trait::async_trait]
pub trait ExchangeClient: Send + Sync + 'static {
    /// Active (non-expired) option listings for `currency`.
    async fn list_instruments(&self, currency: &str) -> Result<Vec<InstrumentRecord>, SourceError>;

    async fn order_book(&self, instrument_name: &str) -> Result<OrderBookRecord, SourceError>;

    async fn index_price(&self, index_name: &str) -> Result<f64, SourceError>;
}

/// Index tracking the spot price of `currency`, e.g. `btc_usd`.
pub fn index_name_for(currency: &str) -> String {
    format!("{}_usd", currency.to_ascii_lowercase())
}

#[derive(Clone)]
pub struct DeribitClient {
    client: Client,
    base_url: Url,
}

impl DeribitClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
        })
    }

    fn endpoint(&self, method: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(&format!("{API_PREFIX}/{method}"));
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        url
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::Request(err)
            }
        })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| {
            if err.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::Request(err)
            }
        })?;
        decode_response(status, &body)
    }
}

#[async_trait::async_trait]
impl ExchangeClient for DeribitClient {
    async fn list_instruments(&self, currency: &str) -> Result<Vec<InstrumentRecord>, SourceError> {
        let url = self.endpoint(
            "get_instruments",
            &[("currency", currency), ("kind", "option"), ("expired", "false")],
        );
        self.get(url).await
    }

    async fn order_book(&self, instrument_name: &str) -> Result<OrderBookRecord, SourceError> {
        let url = self.endpoint("get_order_book", &[("instrument_name", instrument_name)]);
        self.get(url).await
    }

    async fn index_price(&self, index_name: &str) -> Result<f64, SourceError> {
        let url = self.endpoint("get_index_price", &[("index_name", index_name)]);
        let record: IndexPriceRecord = self.get(url).await?;
        record
            .index_price
            .ok_or(SourceError::MissingField("index_price"))
    }
}

fn decode_response<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, SourceError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SourceError::RateLimited(format!("http {}", status.as_u16())));
    }
    let envelope: Envelope<T> = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => return Err(SourceError::HttpStatus(status.as_u16())),
        Err(err) => return Err(SourceError::Malformed(err.to_string())),
    };
    if let Some(error) = envelope.error {
        return Err(SourceError::from_api(error.code, error.message));
    }
    if !status.is_success() {
        return Err(SourceError::HttpStatus(status.as_u16()));
    }
    envelope.result.ok_or(SourceError::MissingResult)
}
