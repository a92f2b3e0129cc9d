// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use core_types::config::PacingSettings;
use core_types::retry::RetryPolicy;
use core_types::types::{Instrument, MarketFields, OptionState};
use deribit_source::{ExchangeClient, OrderBookRecord, SourceError};
use futures::{stream, StreamExt};
use log::{debug, warn};
use tokio::time::sleep;

use crate::error::InstrumentFetchFailed;
use crate::metrics::CollectorMetrics;

/// Aggregate request budget: at most `batch_size` requests per batch, retries included,
/// `batch_delay` between batches, up to `max_in_flight` concurrent requests inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingPolicy {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_in_flight: usize,
}

impl PacingPolicy {
    pub fn new(batch_size: usize, batch_delay: Duration, max_in_flight: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            batch_delay,
            max_in_flight: max_in_flight.clamp(1, batch_size),
        }
    }

    pub fn unpaced() -> Self {
        Self::new(usize::MAX, Duration::ZERO, 1)
    }
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(500), 1)
    }
}

impl From<&PacingSettings> for PacingPolicy {
    fn from(settings: &PacingSettings) -> Self {
        Self::new(
            settings.batch_size,
            settings.batch_delay(),
            settings.max_in_flight,
        )
    }
}

/// States in instrument order, plus the instruments that were skipped.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub states: Vec<OptionState>,
    pub failures: Vec<InstrumentFetchFailed>,
}

pub struct SnapshotFetcher {
    client: Arc<dyn ExchangeClient>,
    pacing: PacingPolicy,
    retry: RetryPolicy,
    metrics: CollectorMetrics,
}

impl SnapshotFetcher {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        pacing: PacingPolicy,
        retry: RetryPolicy,
        metrics: CollectorMetrics,
    ) -> Self {
        Self {
            client,
            pacing,
            retry,
            metrics,
        }
    }

    /// Fetches a single instrument, retrying retryable errors with backoff.
    pub async fn fetch(&self, instrument: &Instrument) -> Result<OptionState, InstrumentFetchFailed> {
        let name = instrument.instrument_name.as_str();
        let mut attempts = 0usize;
        let result = self
            .retry
            .retry_async_if(SourceError::is_retryable, |attempt| {
                attempts = attempt + 1;
                self.request(instrument, attempt)
            })
            .await;
        match result {
            Ok(book) => Ok(option_state(instrument, book)),
            Err(error) => Err(InstrumentFetchFailed {
                instrument_name: name.to_string(),
                attempts,
                error,
            }),
        }
    }

    async fn request(
        &self,
        instrument: &Instrument,
        attempt: usize,
    ) -> Result<OrderBookRecord, SourceError> {
        if attempt > 0 {
            debug!("{}: retry attempt {}", instrument.instrument_name, attempt + 1);
            self.metrics.record_retry();
        }
        self.client.order_book(&instrument.instrument_name).await
    }

    /// Fetches every instrument under the pacing budget. Failures never abort the run.
    ///
    /// Retries are requests too: a retryable failure is queued at the head of a later batch
    /// and counts against that batch's budget. The pause before such a batch is the longer
    /// of the batch delay and the retry backoff.
    pub async fn fetch_all(&self, instruments: &[Instrument]) -> FetchReport {
        self.metrics.record_instruments_requested(instruments.len());
        let mut outcomes: Vec<Option<Result<OptionState, InstrumentFetchFailed>>> =
            instruments.iter().map(|_| None).collect();
        let mut queue: VecDeque<Pending> = (0..instruments.len())
            .map(|idx| Pending { idx, attempts: 0 })
            .collect();
        let mut issued = 0usize;
        let mut backoff = Duration::ZERO;

        while !queue.is_empty() {
            if issued > 0 {
                let pause = self.pacing.batch_delay.max(backoff);
                if !pause.is_zero() {
                    debug!("pacing: {} requests issued, sleeping {:?}", issued, pause);
                    sleep(pause).await;
                }
            }
            let take = queue.len().min(self.pacing.batch_size);
            let batch: Vec<Pending> = queue.drain(..take).collect();
            issued += batch.len();
            let requests: Vec<_> = batch
                .iter()
                .map(|pending| self.request(&instruments[pending.idx], pending.attempts))
                .collect();
            let results: Vec<_> = stream::iter(requests)
                .buffered(self.pacing.max_in_flight)
                .collect()
                .await;

            backoff = Duration::ZERO;
            let mut requeue = Vec::new();
            for (pending, result) in batch.into_iter().zip(results) {
                let instrument = &instruments[pending.idx];
                let attempts = pending.attempts + 1;
                match result {
                    Ok(book) => outcomes[pending.idx] = Some(Ok(option_state(instrument, book))),
                    Err(error) if error.is_retryable() && attempts < self.retry.max_attempts => {
                        if error.is_rate_limit() {
                            debug!("{}: rate limited, requeued", instrument.instrument_name);
                        }
                        backoff = backoff.max(self.retry.backoff(attempts - 1));
                        requeue.push(Pending {
                            idx: pending.idx,
                            attempts,
                        });
                    }
                    Err(error) => {
                        outcomes[pending.idx] = Some(Err(InstrumentFetchFailed {
                            instrument_name: instrument.instrument_name.clone(),
                            attempts,
                            error,
                        }))
                    }
                }
            }
            for pending in requeue.into_iter().rev() {
                queue.push_front(pending);
            }
        }

        let mut report = FetchReport {
            states: Vec::with_capacity(instruments.len()),
            failures: Vec::new(),
        };
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(state) => report.states.push(state),
                Err(failure) => {
                    warn!("skipping {}", failure);
                    self.metrics.record_instrument_failure();
                    report.failures.push(failure);
                }
            }
        }
        report
    }
}

/// Position in the instrument list and attempts already spent on it.
struct Pending {
    idx: usize,
    attempts: usize,
}

fn option_state(instrument: &Instrument, book: OrderBookRecord) -> OptionState {
    OptionState {
        instrument: instrument.clone(),
        market: market_fields(book),
    }
}

/// Zero bid/ask means an empty side of the book.
fn quoted(price: Option<f64>) -> Option<f64> {
    price.filter(|p| *p > 0.0)
}

fn market_fields(book: OrderBookRecord) -> MarketFields {
    let greeks = book.greeks.unwrap_or_default();
    MarketFields {
        mark_price: book.mark_price,
        last_price: book.last_price,
        bid_price: quoted(book.best_bid_price),
        ask_price: quoted(book.best_ask_price),
        delta: greeks.delta,
        gamma: greeks.gamma,
        vega: greeks.vega,
        theta: greeks.theta,
        rho: greeks.rho,
        mark_iv: book.mark_iv,
        bid_iv: book.bid_iv,
        ask_iv: book.ask_iv,
        open_interest: book.open_interest,
        volume_24h: book.stats.and_then(|stats| stats.volume),
        underlying_price: book.underlying_price,
        underlying_index: book.underlying_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{instruments, FakeExchange};
    use tokio::time::Instant;

    fn fetcher(exchange: Arc<FakeExchange>, pacing: PacingPolicy, retry: RetryPolicy) -> SnapshotFetcher {
        SnapshotFetcher::new(exchange, pacing, retry, CollectorMetrics::new())
    }

    #[tokio::test]
    async fn failures_are_isolated_and_order_is_preserved() {
        let listed = instruments(10);
        let exchange = Arc::new(FakeExchange::default().failing(&[
            listed[1].instrument_name.as_str(),
            listed[4].instrument_name.as_str(),
            listed[8].instrument_name.as_str(),
        ]));
        let fetcher = fetcher(exchange.clone(), PacingPolicy::unpaced(), RetryPolicy::none());

        let report = fetcher.fetch_all(&listed).await;

        assert_eq!(report.states.len(), 7);
        assert_eq!(report.failures.len(), 3);
        assert_eq!(report.failures[0].instrument_name, listed[1].instrument_name);
        let fetched: Vec<_> = report
            .states
            .iter()
            .map(|s| s.instrument.instrument_name.clone())
            .collect();
        let mut sorted = fetched.clone();
        sorted.sort();
        assert_eq!(fetched, sorted);
        let snapshot = fetcher.metrics.snapshot();
        assert_eq!(snapshot.instruments_requested, 10);
        assert_eq!(snapshot.instrument_failures, 3);
    }

    #[tokio::test]
    async fn book_fields_are_mapped_and_empty_sides_become_null() {
        let listed = instruments(1);
        let exchange = Arc::new(FakeExchange::default().with_book(|book| {
            book.best_bid_price = Some(0.0);
            book.best_ask_price = Some(0.031);
        }));
        let fetcher = fetcher(exchange, PacingPolicy::unpaced(), RetryPolicy::none());

        let state = fetcher.fetch(&listed[0]).await.unwrap();
        assert_eq!(state.market.bid_price, None);
        assert_eq!(state.market.ask_price, Some(0.031));
        assert_eq!(state.market.delta, Some(0.5));
        assert_eq!(state.market.volume_24h, Some(12.0));
        assert_eq!(state.market.underlying_index.as_deref(), Some("BTC-29MAR24"));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_are_retried_until_success() {
        let listed = instruments(1);
        let exchange = Arc::new(FakeExchange::default().rate_limited_first(2));
        let fetcher = fetcher(
            exchange.clone(),
            PacingPolicy::unpaced(),
            RetryPolicy::new(3, 100, 1_000, 0.0),
        );

        let state = fetcher.fetch(&listed[0]).await;
        assert!(state.is_ok());
        assert_eq!(exchange.order_book_calls(), 3);
        assert_eq!(fetcher.metrics.snapshot().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_attempts() {
        let listed = instruments(1);
        let exchange = Arc::new(FakeExchange::default().rate_limited_first(10));
        let fetcher = fetcher(
            exchange.clone(),
            PacingPolicy::unpaced(),
            RetryPolicy::new(3, 100, 1_000, 0.0),
        );

        let failure = fetcher.fetch(&listed[0]).await.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(failure.error.is_rate_limit());
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let listed = instruments(1);
        let exchange = Arc::new(FakeExchange::default().failing(&[listed[0].instrument_name.as_str()]));
        let fetcher = fetcher(
            exchange.clone(),
            PacingPolicy::unpaced(),
            RetryPolicy::new(5, 100, 1_000, 0.0),
        );

        let failure = fetcher.fetch(&listed[0]).await.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(exchange.order_book_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_separated_by_the_pacing_delay() {
        let listed = instruments(25);
        let exchange = Arc::new(FakeExchange::default());
        let pacing = PacingPolicy::new(10, Duration::from_millis(500), 4);
        let fetcher = fetcher(exchange.clone(), pacing, RetryPolicy::none());

        let started = Instant::now();
        let report = fetcher.fetch_all(&listed).await;

        assert_eq!(report.states.len(), 25);
        assert_eq!(exchange.order_book_calls(), 25);
        // three batches, two pauses
        assert_eq!(started.elapsed(), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_take_slots_in_the_next_batch() {
        let listed = instruments(5);
        let exchange = Arc::new(FakeExchange::default().rate_limited_first(2));
        let pacing = PacingPolicy::new(2, Duration::from_secs(10), 2);
        let fetcher = fetcher(exchange.clone(), pacing, RetryPolicy::new(3, 100, 1_000, 0.0));

        let started = Instant::now();
        let report = fetcher.fetch_all(&listed).await;

        assert!(report.failures.is_empty());
        let fetched: Vec<_> = report
            .states
            .iter()
            .map(|s| s.instrument.instrument_name.clone())
            .collect();
        let expected: Vec<_> = listed.iter().map(|i| i.instrument_name.clone()).collect();
        assert_eq!(fetched, expected);
        // the two retries fill the second batch, pushing the fresh instruments back
        assert_eq!(exchange.calls_per_instant(), vec![2, 2, 2, 1]);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(fetcher.metrics.snapshot().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_longer_than_batch_delay_stretches_the_pause() {
        let listed = instruments(1);
        let exchange = Arc::new(FakeExchange::default().rate_limited_first(1));
        let pacing = PacingPolicy::new(10, Duration::from_millis(500), 1);
        let fetcher = fetcher(exchange.clone(), pacing, RetryPolicy::new(3, 2_000, 5_000, 0.0));

        let started = Instant::now();
        let report = fetcher.fetch_all(&listed).await;

        assert_eq!(report.states.len(), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn paced_retries_give_up_after_max_attempts() {
        let listed = instruments(2);
        let exchange = Arc::new(FakeExchange::default().rate_limited_first(3));
        let pacing = PacingPolicy::new(5, Duration::from_secs(1), 1);
        let fetcher = fetcher(exchange.clone(), pacing, RetryPolicy::new(2, 100, 1_000, 0.0));

        let report = fetcher.fetch_all(&listed).await;

        assert_eq!(report.states.len(), 1);
        assert_eq!(report.states[0].instrument.instrument_name, listed[1].instrument_name);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].instrument_name, listed[0].instrument_name);
        assert_eq!(report.failures[0].attempts, 2);
        assert!(report.failures[0].error.is_rate_limit());
        assert_eq!(exchange.order_book_calls(), 4);
        assert_eq!(fetcher.metrics.snapshot().instrument_failures, 1);
    }

    #[test]
    fn pacing_policy_clamps_concurrency_to_batch() {
        let policy = PacingPolicy::new(0, Duration::ZERO, 0);
        assert_eq!(policy.batch_size, 1);
        assert_eq!(policy.max_in_flight, 1);
        let policy = PacingPolicy::new(4, Duration::ZERO, 16);
        assert_eq!(policy.max_in_flight, 4);
        assert_eq!(PacingPolicy::default().batch_delay, Duration::from_millis(500));
    }
}
