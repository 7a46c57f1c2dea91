// Drives the scheduler from the calendar on a fixed interval.
use crate::client::CalendarSource;
use crate::ledger::JobLedger;
use crate::scheduler::{CycleReport, Scheduler};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Ledger entries armed more than this long ago are forgotten.
const LEDGER_GRACE_DAYS: i64 = 2;

pub struct Poller {
    source: Arc<dyn CalendarSource>,
    scheduler: Scheduler,
    ledger: Arc<dyn JobLedger>,
    lookahead: Duration,
    interval: std::time::Duration,
    fetch_timeout: std::time::Duration,
}

impl Poller {
    pub fn new(
        source: Arc<dyn CalendarSource>,
        scheduler: Scheduler,
        ledger: Arc<dyn JobLedger>,
        lookahead: Duration,
        interval: std::time::Duration,
        fetch_timeout: std::time::Duration,
    ) -> Self {
        Self {
            source,
            scheduler,
            ledger,
            lookahead,
            interval,
            fetch_timeout,
        }
    }

    /// One cycle over `[now, now + lookahead]`. A failed fetch aborts the cycle
    /// before anything is touched.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let window_start = now;
        let window_end = now + self.lookahead;

        // Discovery may take several round-trips, each already bounded; this
        // bounds the whole fetch.
        let events = tokio::time::timeout(
            self.fetch_timeout,
            self.source.fetch(window_start, window_end),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Calendar fetch timed out after {:?}", self.fetch_timeout))?
        .context("Calendar fetch failed")?;

        let report = self
            .scheduler
            .run_cycle(&events, window_start, window_end, now);
        log::info!(
            "Cycle done: {} events, {} occurrences, {} scheduled, {} rescheduled, {} unchanged, {} past due, {} failed",
            events.len(),
            report.occurrences,
            report.scheduled,
            report.rescheduled,
            report.unchanged,
            report.past_due,
            report.failed
        );

        match self
            .ledger
            .prune_expired(now, Duration::days(LEDGER_GRACE_DAYS))
        {
            Ok(0) => {}
            Ok(n) => log::debug!("Pruned {} expired ledger entries", n),
            Err(e) => log::warn!("Ledger prune failed: {}", e),
        }
        Ok(report)
    }

    /// Polls until Ctrl-C. Cycle failures are logged and retried next interval.
    pub async fn run(&self) -> Result<()> {
        log::info!("Polling every {:?}", self.interval);
        loop {
            if let Err(e) = self.poll_once(Utc::now()).await {
                log::error!("Poll cycle aborted: {:#}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Shutting down");
                    return Ok(());
                }
            }
        }
    }
}
