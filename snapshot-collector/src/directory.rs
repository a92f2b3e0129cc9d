// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use core_types::retry::RetryPolicy;
use core_types::types::{Instrument, OptionType};
use deribit_source::{ExchangeClient, InstrumentRecord, SourceError};
use log::{debug, info};

use crate::error::CollectorError;

const OPTION_KIND: &str = "option";

/// Lists the active option set for a currency. Either the whole set or an error.
pub struct InstrumentDirectory {
    client: Arc<dyn ExchangeClient>,
    retry: RetryPolicy,
}

impl InstrumentDirectory {
    pub fn new(client: Arc<dyn ExchangeClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Active instruments sorted by name, without duplicates.
    pub async fn list_active_instruments(
        &self,
        currency: &str,
    ) -> Result<Vec<Instrument>, CollectorError> {
        let records = self
            .retry
            .retry_async_if(SourceError::is_retryable, |_| {
                self.client.list_instruments(currency)
            })
            .await
            .map_err(|err| CollectorError::DirectoryUnavailable(err.to_string()))?;

        let mut by_name = BTreeMap::new();
        let mut inactive = 0usize;
        for record in records {
            if record.is_active == Some(false) {
                inactive += 1;
                continue;
            }
            let instrument = parse_instrument(record, currency)
                .map_err(CollectorError::DirectoryUnavailable)?;
            by_name.insert(instrument.instrument_name.clone(), instrument);
        }
        if inactive > 0 {
            debug!("{}: skipped {} inactive listings", currency, inactive);
        }
        info!("{}: {} active options listed", currency, by_name.len());
        Ok(by_name.into_values().collect())
    }
}

fn parse_instrument(record: InstrumentRecord, currency: &str) -> Result<Instrument, String> {
    let name = record
        .instrument_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| "listing without instrument_name".to_string())?;
    if let Some(kind) = record.kind.as_deref() {
        if kind != OPTION_KIND {
            return Err(format!("{name}: unexpected kind '{kind}'"));
        }
    }
    let strike = record
        .strike
        .filter(|strike| strike.is_finite())
        .ok_or_else(|| format!("{name}: missing strike"))?;
    let expiration = record
        .expiration_timestamp
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .ok_or_else(|| format!("{name}: missing expiration_timestamp"))?;
    let option_type = record
        .option_type
        .ok_or_else(|| format!("{name}: missing option_type"))?
        .parse::<OptionType>()
        .map_err(|err| format!("{name}: {err}"))?;
    let currency = record
        .base_currency
        .unwrap_or_else(|| currency.to_string())
        .to_ascii_uppercase();
    Ok(Instrument {
        instrument_name: name,
        currency,
        strike,
        expiration,
        option_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{listing, FakeExchange};

    fn directory(exchange: FakeExchange) -> InstrumentDirectory {
        InstrumentDirectory::new(Arc::new(exchange), RetryPolicy::none())
    }

    #[tokio::test]
    async fn listings_are_sorted_and_deduplicated() {
        let exchange = FakeExchange::with_listings(vec![
            listing("BTC-29MAR24-70000-P"),
            listing("BTC-29MAR24-50000-C"),
            listing("BTC-29MAR24-70000-P"),
        ]);
        let instruments = directory(exchange)
            .list_active_instruments("BTC")
            .await
            .unwrap();
        let names: Vec<_> = instruments
            .iter()
            .map(|i| i.instrument_name.as_str())
            .collect();
        assert_eq!(names, vec!["BTC-29MAR24-50000-C", "BTC-29MAR24-70000-P"]);
        assert_eq!(instruments[1].option_type, OptionType::Put);
        assert_eq!(instruments[0].currency, "BTC");
    }

    #[tokio::test]
    async fn inactive_listings_are_skipped() {
        let mut stale = listing("BTC-29MAR24-60000-C");
        stale.is_active = Some(false);
        let exchange = FakeExchange::with_listings(vec![listing("BTC-29MAR24-50000-C"), stale]);
        let instruments = directory(exchange)
            .list_active_instruments("BTC")
            .await
            .unwrap();
        assert_eq!(instruments.len(), 1);
    }

    #[tokio::test]
    async fn malformed_listing_fails_the_whole_directory() {
        let mut broken = listing("BTC-29MAR24-60000-C");
        broken.strike = None;
        let exchange = FakeExchange::with_listings(vec![listing("BTC-29MAR24-50000-C"), broken]);
        let err = directory(exchange)
            .list_active_instruments("BTC")
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::DirectoryUnavailable(_)));

        let mut future = listing("BTC-29MAR24");
        future.kind = Some("future".into());
        let exchange = FakeExchange::with_listings(vec![future]);
        assert!(directory(exchange)
            .list_active_instruments("BTC")
            .await
            .is_err());

        let mut odd = listing("BTC-29MAR24-60000-X");
        odd.option_type = Some("straddle".into());
        let exchange = FakeExchange::with_listings(vec![odd]);
        assert!(directory(exchange)
            .list_active_instruments("BTC")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_directory_unavailable() {
        let exchange = FakeExchange::with_listings(Vec::new()).directory_down();
        let err = directory(exchange)
            .list_active_instruments("BTC")
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::DirectoryUnavailable(_)));
    }
}
