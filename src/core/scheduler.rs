//! Periodic driver of the valuation engine.
//!
//! The scheduler owns a two-state machine, Idle and TickRunning. A timer
//! firing inside the trading window starts a tick only from Idle; a firing
//! that finds a tick still running is skipped, never queued. Ticks run in
//! their own task under a hard deadline so the timer loop is never blocked.

use crate::core::calendar::TradingWindow;
use crate::core::config::AppConfig;
use crate::core::engine::{TickReport, ValuationEngine};
use crate::core::error::MetricsError;
use crate::core::metrics::RiskMetrics;
use crate::core::nav::{NavHistoryProvider, NavSyncReport, sync_nav_history};
use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{error, info, warn};

/// Upper bound on the pause after consecutive failed ticks.
const MAX_FAILURE_BACKOFF: Duration = Duration::from_secs(30 * 60);

/// Pause between NAV sync attempts while some of today's NAVs are unpublished.
const NAV_SYNC_RETRY: TimeDelta = TimeDelta::hours(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    TickRunning = 1,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        if value == SchedulerState::TickRunning as u8 {
            SchedulerState::TickRunning
        } else {
            SchedulerState::Idle
        }
    }
}

/// What a timer firing did.
#[derive(Debug)]
pub enum TickOutcome {
    /// A tick was started; the handle yields its report, `None` when the tick
    /// failed or was abandoned at the deadline.
    Started(JoinHandle<Option<TickReport>>),
    SkippedOverlap,
    SkippedBackoff,
    /// Outside the trading window.
    Dormant,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub deadline: Duration,
    pub nav_sync_after: NaiveTime,
    pub retention_days: u32,
    pub metrics_window: usize,
    pub risk_free_rate: f64,
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            interval: config.schedule.interval(),
            deadline: config.schedule.tick_deadline(),
            nav_sync_after: config.schedule.nav_sync_time()?,
            retention_days: config.retention_days,
            metrics_window: config.metrics.window,
            risk_free_rate: config.metrics.risk_free_rate,
        })
    }

    /// Ticks skipped after `failures` consecutive failed ticks.
    fn ticks_to_skip(&self, failures: u32) -> u32 {
        if failures <= 1 {
            return 0;
        }
        let max_skip = (MAX_FAILURE_BACKOFF.as_secs() / self.interval.as_secs().max(1)) as u32;
        let exponent = (failures - 1).min(16);
        ((1u32 << exponent) - 1).min(max_skip)
    }
}

#[derive(Debug, Default)]
struct FailureState {
    consecutive: u32,
    skip_remaining: u32,
}

#[derive(Debug, Default)]
struct DailyState {
    last_purge: Option<NaiveDate>,
    /// Day on which every fund got its NAV.
    nav_complete: Option<NaiveDate>,
    last_nav_attempt: Option<DateTime<Utc>>,
}

/// Work done by the once-a-day jobs on one loop iteration.
#[derive(Debug, Default)]
pub struct DailyReport {
    pub purged: Option<usize>,
    pub nav_sync: Option<NavSyncReport>,
    /// Funds still missing today's NAV after the sync.
    pub nav_pending: Vec<String>,
    pub metrics: Vec<(String, Result<RiskMetrics, MetricsError>)>,
}

/// Resets the state to Idle when the tick ends, however it ends.
struct TickGuard(Arc<AtomicU8>);

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.0.store(SchedulerState::Idle as u8, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Scheduler {
    engine: Arc<ValuationEngine>,
    window: TradingWindow,
    settings: SchedulerSettings,
    nav_provider: Option<Arc<dyn NavHistoryProvider>>,
    state: Arc<AtomicU8>,
    failures: Arc<Mutex<FailureState>>,
    daily: Mutex<DailyState>,
    clock: fn() -> DateTime<Utc>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<ValuationEngine>,
        window: TradingWindow,
        settings: SchedulerSettings,
        nav_provider: Option<Arc<dyn NavHistoryProvider>>,
    ) -> Self {
        Self {
            engine,
            window,
            settings,
            nav_provider,
            state: Arc::new(AtomicU8::new(SchedulerState::Idle as u8)),
            failures: Arc::new(Mutex::new(FailureState::default())),
            daily: Mutex::new(DailyState::default()),
            clock: Utc::now,
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Handles one timer firing at wall-clock time `now`.
    pub fn fire(&self, now: DateTime<Utc>) -> TickOutcome {
        if !self.window.contains(now) {
            return TickOutcome::Dormant;
        }

        {
            let mut failures = lock(&self.failures);
            if failures.skip_remaining > 0 {
                failures.skip_remaining -= 1;
                info!(
                    remaining = failures.skip_remaining,
                    "Backing off after {} failed tick(s)", failures.consecutive
                );
                return TickOutcome::SkippedBackoff;
            }
        }

        if self
            .state
            .compare_exchange(
                SchedulerState::Idle as u8,
                SchedulerState::TickRunning as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            warn!("Previous tick still running, skipping this one");
            return TickOutcome::SkippedOverlap;
        }
        let guard = TickGuard(Arc::clone(&self.state));

        let engine = Arc::clone(&self.engine);
        let failures = Arc::clone(&self.failures);
        let settings = self.settings.clone();
        let as_of = self.window.local_date(now);

        let handle = tokio::spawn(async move {
            let _guard = guard;
            match timeout(settings.deadline, engine.run_tick(now, as_of)).await {
                Ok(Ok(report)) => {
                    *lock(&failures) = FailureState::default();
                    Some(report)
                }
                Ok(Err(e)) => {
                    let mut failures = lock(&failures);
                    failures.consecutive += 1;
                    failures.skip_remaining = settings.ticks_to_skip(failures.consecutive);
                    error!(
                        consecutive = failures.consecutive,
                        "Tick failed: {:#}", e
                    );
                    None
                }
                Err(_) => {
                    warn!(
                        "Tick abandoned after {:?}; valuations already persisted are kept",
                        settings.deadline
                    );
                    None
                }
            }
        });
        TickOutcome::Started(handle)
    }

    /// Runs the purge and the after-close jobs that are due at `now`.
    pub async fn run_daily_jobs(&self, now: DateTime<Utc>) -> DailyReport {
        let mut report = DailyReport::default();
        let today = self.window.local_date(now);

        let purge_due = lock(&self.daily).last_purge != Some(today);
        if purge_due {
            let cutoff = today
                .checked_sub_days(Days::new(u64::from(self.settings.retention_days)))
                .unwrap_or(NaiveDate::MIN);
            match self.engine.nav_store().purge_estimates_before(cutoff).await {
                Ok(purged) => {
                    info!(purged, "Purged estimated valuations before {}", cutoff);
                    lock(&self.daily).last_purge = Some(today);
                    report.purged = Some(purged);
                }
                Err(e) => error!("Failed to purge old estimates: {:#}", e),
            }
        }

        let Some(provider) = self.nav_provider.as_deref() else {
            return report;
        };
        let sync_due = {
            let daily = lock(&self.daily);
            daily.nav_complete != Some(today)
                && self.window.is_trading_day(today)
                && self.window.local_time(now) >= self.settings.nav_sync_after
                && daily.last_nav_attempt.is_none_or(|at| {
                    self.window.local_date(at) != today || now - at >= NAV_SYNC_RETRY
                })
        };
        if !sync_due {
            return report;
        }

        let funds = match self.engine.funds().await {
            Ok(funds) => funds,
            Err(e) => {
                error!("NAV sync skipped: {:#}", e);
                return report;
            }
        };
        let first_attempt = lock(&self.daily)
            .last_nav_attempt
            .is_none_or(|at| self.window.local_date(at) != today);
        let sync = sync_nav_history(provider, self.engine.nav_store().as_ref(), &funds).await;

        for fund in &funds {
            match self.engine.nav_store().latest_nav(&fund.code).await {
                Ok(Some(latest)) if latest.date >= today => {}
                Ok(_) => report.nav_pending.push(fund.code.clone()),
                Err(e) => {
                    warn!(fund = %fund.code, "Could not read latest NAV: {:#}", e);
                    report.nav_pending.push(fund.code.clone());
                }
            }
        }
        {
            let mut daily = lock(&self.daily);
            daily.last_nav_attempt = Some(now);
            if report.nav_pending.is_empty() {
                daily.nav_complete = Some(today);
            }
        }
        if report.nav_pending.is_empty() {
            info!(appended = sync.appended(), "Daily NAV sync complete");
        } else {
            info!(
                appended = sync.appended(),
                pending = report.nav_pending.len(),
                "NAV not yet published for some funds, retrying in {}h",
                NAV_SYNC_RETRY.num_hours()
            );
        }

        let refresh_metrics = first_attempt || sync.appended() > 0;
        report.nav_sync = Some(sync);
        if !refresh_metrics {
            return report;
        }

        for fund in &funds {
            match self
                .engine
                .fund_metrics(
                    &fund.code,
                    self.settings.metrics_window,
                    self.settings.risk_free_rate,
                )
                .await
            {
                Ok(Ok(metrics)) => {
                    info!(
                        fund = %fund.code,
                        sharpe = ?metrics.sharpe.value(),
                        max_drawdown = metrics.max_drawdown,
                        volatility = metrics.annualized_volatility,
                        "Metrics updated"
                    );
                    report.metrics.push((fund.code.clone(), Ok(metrics)));
                }
                Ok(Err(e)) => {
                    info!(fund = %fund.code, "Metrics unavailable: {}", e);
                    report.metrics.push((fund.code.clone(), Err(e)));
                }
                Err(e) => error!(fund = %fund.code, "Metrics failed: {:#}", e),
            }
        }
        report
    }

    /// Drives ticks and daily jobs until `shutdown` resolves. A tick still
    /// running at shutdown is allowed to finish within its deadline; daily
    /// jobs are cancelled.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(interval = ?self.settings.interval, "Scheduler started");
        let mut running: Option<JoinHandle<Option<TickReport>>> = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let now = (self.clock)();
                    if let TickOutcome::Started(handle) = self.fire(now) {
                        running = Some(handle);
                    }
                    if !self.window.contains(now) {
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = self.run_daily_jobs(now) => {}
                        }
                    }
                }
            }
        }

        if let Some(handle) = running.filter(|h| !h.is_finished()) {
            info!("Waiting for the running tick to finish");
            let _ = handle.await;
        }
        info!("Scheduler stopped");
    }
}
