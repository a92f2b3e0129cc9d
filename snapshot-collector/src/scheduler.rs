// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::sync::Arc;
use std::time::Duration;

use core_types::config::Iterations;
use log::{error, info, warn};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::metrics::CollectorMetrics;
use crate::{CollectorError, CycleReport};

/// A unit of work repeated by [`run`].
#[async_trait::async_trait]
pub trait Cycle: Send + Sync + 'static {
    async fn run_cycle(&self) -> Result<CycleReport, CollectorError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles_run: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub cancelled: bool,
}

/// Runs `cycle` every `interval`, measured start to start, until `iterations` cycles have
/// run or `cancel` fires. Cancellation is observed between cycles only.
pub async fn run(
    cycle: Arc<dyn Cycle>,
    interval: Duration,
    iterations: Iterations,
    cancel: CancellationToken,
    metrics: CollectorMetrics,
) -> RunSummary {
    let mut summary = RunSummary::default();
    loop {
        if iterations.is_exhausted(summary.cycles_run) {
            break;
        }
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        let started = Instant::now();
        let number = summary.cycles_run + 1;
        metrics.record_cycle_started();
        let task = {
            let cycle = Arc::clone(&cycle);
            tokio::spawn(async move { cycle.run_cycle().await })
        };
        let outcome = task.await;
        let elapsed = started.elapsed();
        summary.cycles_run += 1;
        match outcome {
            Ok(Ok(report)) => {
                summary.cycles_succeeded += 1;
                metrics.record_cycle_completed(elapsed);
                info!(
                    "cycle {}: {} rows from {} instruments ({} failed) in {:?}",
                    number,
                    report.rows_written,
                    report.instruments,
                    report.failures.len(),
                    elapsed
                );
            }
            Ok(Err(err)) => {
                summary.cycles_failed += 1;
                metrics.record_cycle_failed(elapsed);
                warn!("cycle {} failed: {}", number, err);
            }
            Err(join_err) => {
                summary.cycles_failed += 1;
                metrics.record_cycle_failed(elapsed);
                error!("cycle {} aborted: {}", number, join_err);
            }
        }

        if iterations.is_exhausted(summary.cycles_run) {
            break;
        }
        let Some(next_start) = started.checked_add(interval) else {
            warn!(
                "interval {:?} is beyond the clock range; waiting for cancellation",
                interval
            );
            cancel.cancelled().await;
            summary.cancelled = true;
            break;
        };
        if next_start <= Instant::now() {
            warn!(
                "cycle {} overran the {:?} interval, starting next cycle immediately",
                number, interval
            );
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                summary.cancelled = true;
                break;
            }
            _ = sleep_until(next_start) => {}
        }
    }
    info!(
        "scheduler stopped after {} cycles ({} failed{})",
        summary.cycles_run,
        summary.cycles_failed,
        if summary.cancelled { ", cancelled" } else { "" }
    );
    summary
}
