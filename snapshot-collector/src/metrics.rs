// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

#[derive(Default)]
struct CollectorMetricsInner {
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_failed: AtomicU64,
    instruments_requested: AtomicU64,
    instrument_failures: AtomicU64,
    retries: AtomicU64,
    rows_written: AtomicU64,
    last_cycle_duration_ms: AtomicU64,
}

/// Cloneable handle over process-wide collector counters.
#[derive(Clone, Default)]
pub struct CollectorMetrics {
    inner: Arc<CollectorMetricsInner>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorMetricsSnapshot {
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub instruments_requested: u64,
    pub instrument_failures: u64,
    pub retries: u64,
    pub rows_written: u64,
    pub last_cycle_duration_ms: u64,
}

impl CollectorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle_started(&self) {
        self.inner.cycles_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_completed(&self, elapsed: Duration) {
        self.inner.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.observe_duration(elapsed);
    }

    pub fn record_cycle_failed(&self, elapsed: Duration) {
        self.inner.cycles_failed.fetch_add(1, Ordering::Relaxed);
        self.observe_duration(elapsed);
    }

    pub fn record_instruments_requested(&self, count: usize) {
        if count > 0 {
            self.inner
                .instruments_requested
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn record_instrument_failure(&self) {
        self.inner
            .instrument_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows_written(&self, rows: usize) {
        if rows > 0 {
            self.inner
                .rows_written
                .fetch_add(rows as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CollectorMetricsSnapshot {
        CollectorMetricsSnapshot {
            cycles_started: self.inner.cycles_started.load(Ordering::Relaxed),
            cycles_completed: self.inner.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.inner.cycles_failed.load(Ordering::Relaxed),
            instruments_requested: self.inner.instruments_requested.load(Ordering::Relaxed),
            instrument_failures: self.inner.instrument_failures.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            rows_written: self.inner.rows_written.load(Ordering::Relaxed),
            last_cycle_duration_ms: self.inner.last_cycle_duration_ms.load(Ordering::Relaxed),
        }
    }

    fn observe_duration(&self, elapsed: Duration) {
        let millis = elapsed.as_millis().min(u64::MAX as u128) as u64;
        self.inner
            .last_cycle_duration_ms
            .store(millis, Ordering::Relaxed);
    }
}
