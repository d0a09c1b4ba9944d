use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::observability::{
    REAPER_SWEEPS_TOTAL, RESERVATIONS_REAPED_TOTAL, WAL_COMPACTIONS_TOTAL,
};
use crate::store::WalStore;

/// Once-per-date trigger for the expiration sweep. Due on the first check,
/// then again each time the calendar date moves past the last run.
#[derive(Debug, Default, Clone, Copy)]
pub struct DailySchedule {
    last_run: Option<NaiveDate>,
}

impl DailySchedule {
    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.last_run.is_none_or(|last| today > last)
    }

    pub fn mark_run(&mut self, today: NaiveDate) {
        self.last_run = Some(today);
    }

    pub fn last_run(&self) -> Option<NaiveDate> {
        self.last_run
    }
}

/// Delete everything dated before `today`. Failures are logged and left for
/// the next date's sweep, which re-evaluates the filter from scratch.
pub async fn sweep(engine: &Engine, today: NaiveDate) -> Option<usize> {
    match engine.purge_expired(today).await {
        Ok(reaped) => {
            metrics::counter!(REAPER_SWEEPS_TOTAL, "outcome" => "ok").increment(1);
            metrics::counter!(RESERVATIONS_REAPED_TOTAL).increment(reaped as u64);
            info!("reaped {reaped} reservations dated before {today}");
            Some(reaped)
        }
        Err(e) => {
            metrics::counter!(REAPER_SWEEPS_TOTAL, "outcome" => "error").increment(1);
            error!("expiration sweep for {today} failed: {e}");
            None
        }
    }
}

/// Background task that deletes past-dated reservations once per local date.
/// A single loop, so at most one sweep is ever in flight.
pub async fn run_reaper(engine: Arc<Engine>, poll: Duration) {
    let mut schedule = DailySchedule::default();
    let mut interval = tokio::time::interval(poll);
    loop {
        interval.tick().await;
        let today = Local::now().date_naive();
        if !schedule.is_due(today) {
            continue;
        }
        sweep(&engine, today).await;
        schedule.mark_run(today);
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, check_every: Duration) {
    let mut interval = tokio::time::interval(check_every);
    loop {
        interval.tick().await;
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => {
                metrics::counter!(WAL_COMPACTIONS_TOTAL, "outcome" => "ok").increment(1);
                debug!("compacted WAL after {appends} appends");
            }
            Err(e) => {
                metrics::counter!(WAL_COMPACTIONS_TOTAL, "outcome" => "error").increment(1);
                error!("WAL compaction failed: {e}");
            }
        }
    }
}
