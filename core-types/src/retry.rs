// Copyright (c) James Kassemi, SC, US. All rights reserved.
use crate::config::RetrySettings;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Jittered exponential backoff for exchange requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: usize,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_pct: f64,
    ) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(1, 1, 1, 0.0)
    }

    /// Jittered delay before retry number `retry + 1`.
    pub fn backoff(&self, retry: usize) -> Duration {
        let exp = 2_u64.saturating_pow(retry as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        if self.jitter_pct <= 0.0 {
            return Duration::from_millis(delay);
        }
        let spread = (delay as f64 * self.jitter_pct) as i64;
        let delta = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis(delay.saturating_add_signed(delta))
    }

    /// Retries only errors accepted by `retryable`; anything else is returned immediately.
    /// `op` receives the zero-based attempt number.
    pub async fn retry_async_if<P, F, Fut, T, E>(&self, retryable: P, mut op: F) -> Result<T, E>
    where
        P: Fn(&E) -> bool,
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(val) => return Ok(val),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !retryable(&err) {
                        return Err(err);
                    }
                    sleep(self.backoff(attempt - 1)).await;
                }
            }
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            settings.base_delay_ms,
            settings.max_delay_ms,
            0.25,
        )
    }
}
