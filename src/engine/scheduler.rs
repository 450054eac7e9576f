//! Adaptive poll scheduler.
//!
//! Runs subscription and premium reconciliation on a loop whose delay is
//! recomputed before every sleep: short inside the trading window, long
//! outside it. Each cycle evaluates alerts against the previous values,
//! persists every reconciled record and then rolls the previous-value maps
//! forward.
//!
//! The scheduler is a cheap cloneable handle. One loop is armed at a time;
//! cycles (timed or manual) are serialized by a cycle lock.

use anyhow::{Context, Result};
use futures::FutureExt;
use chrono::{DateTime, Datelike, Local, NaiveTime, TimeZone, Utc, Weekday};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::aggregator::Aggregator;
use super::alerts::{evaluate, AlertBuffer, AlertRules};
use crate::config::{AppConfig, SchedulerConfig, TradingWindowConfig};
use crate::storage::snapshot::Baseline;
use crate::storage::{OfferingStore, SERIES_GMP, SERIES_SUBSCRIPTION_TOTAL};
use crate::types::{AlertEvent, AlertSeverity, OperationKind, ReconciledRecord, SourceName, TrackerError};

/// Alerts returned by the status view.
const STATUS_RECENT_ALERTS: usize = 20;

// ---------------------------------------------------------------------------
// Trading window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TradingWindow {
    weekdays: Vec<Weekday>,
    start: NaiveTime,
    end: NaiveTime,
    in_window_interval: Duration,
    off_window_interval: Duration,
}

impl Default for TradingWindow {
    fn default() -> Self {
        Self {
            weekdays: vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
            start: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
            in_window_interval: Duration::from_secs(5 * 60),
            off_window_interval: Duration::from_secs(30 * 60),
        }
    }
}

impl TradingWindow {
    pub fn from_config(window: &TradingWindowConfig, sched: &SchedulerConfig) -> Result<Self> {
        let weekdays = window
            .weekdays
            .iter()
            .map(|d| {
                d.parse::<Weekday>()
                    .map_err(|_| anyhow::anyhow!("Invalid weekday in trading window: {d}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let parse_time = |s: &str| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .with_context(|| format!("Invalid trading window time (want HH:MM): {s}"))
        };
        Ok(Self {
            weekdays,
            start: parse_time(&window.start)?,
            end: parse_time(&window.end)?,
            in_window_interval: Duration::from_secs(sched.in_window_interval_secs),
            off_window_interval: Duration::from_secs(sched.off_window_interval_secs),
        })
    }

    /// Whether `at`, read in its own timezone, falls inside the window.
    /// Start is inclusive, end exclusive.
    pub fn contains<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        let local = at.naive_local();
        self.weekdays.contains(&local.weekday()) && local.time() >= self.start && local.time() < self.end
    }

    /// Delay until the next cycle when the current one finishes at `at`.
    pub fn next_delay<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> Duration {
        if self.contains(at) {
            self.in_window_interval
        } else {
            self.off_window_interval
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Mutable scheduler state. Readers see either the state before a cycle
/// or after it, never in between.
#[derive(Debug)]
pub struct PollState {
    pub running: bool,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub cycle_count: u64,
    /// Key → last subscription total.
    pub previous_totals: HashMap<String, f64>,
    /// Key → last grey-market premium.
    pub previous_premiums: HashMap<String, f64>,
    pub alerts: AlertBuffer,
}

impl PollState {
    fn new(alert_cap: usize) -> Self {
        Self {
            running: false,
            last_poll_time: None,
            cycle_count: 0,
            previous_totals: HashMap::new(),
            previous_premiums: HashMap::new(),
            alerts: AlertBuffer::new(alert_cap),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PollStatus {
    pub running: bool,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub cycle_count: u64,
    pub is_within_trading_window: bool,
    pub recent_alerts: Vec<AlertEvent>,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub subscriptions: usize,
    pub premiums: usize,
    pub subscription_sources_ok: usize,
    pub premium_sources_ok: usize,
    pub alerts_raised: usize,
    pub persistence_failures: usize,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Everything the scheduler needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub rules: AlertRules,
    pub window: TradingWindow,
    pub subscription_sources: Vec<SourceName>,
    pub premium_sources: Vec<SourceName>,
    pub alert_buffer_cap: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            rules: AlertRules::default(),
            window: TradingWindow::default(),
            subscription_sources: vec![SourceName::Nse, SourceName::Chittorgarh, SourceName::InvestorGain],
            premium_sources: vec![SourceName::InvestorGain, SourceName::IpoCentral, SourceName::Chittorgarh],
            alert_buffer_cap: 100,
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let parse_sources = |names: &[String]| -> Result<Vec<SourceName>> {
            names
                .iter()
                .map(|n| n.parse::<SourceName>().map_err(anyhow::Error::from))
                .collect()
        };
        Ok(Self {
            rules: AlertRules::from(&cfg.alerts),
            window: TradingWindow::from_config(&cfg.trading_window, &cfg.scheduler)?,
            subscription_sources: parse_sources(&cfg.scheduler.subscription_sources)
                .context("Invalid scheduler.subscription_sources")?,
            premium_sources: parse_sources(&cfg.scheduler.premium_sources)
                .context("Invalid scheduler.premium_sources")?,
            alert_buffer_cap: cfg.scheduler.alert_buffer_cap,
        })
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Inner {
    aggregator: Arc<Aggregator>,
    store: Arc<dyn OfferingStore>,
    settings: SchedulerSettings,
    state: RwLock<PollState>,
    cycle_lock: Mutex<()>,
    /// Stop signal for the armed loop, if any.
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<Inner>,
}

impl PollScheduler {
    pub fn new(aggregator: Arc<Aggregator>, store: Arc<dyn OfferingStore>, settings: SchedulerSettings) -> Self {
        let state = PollState::new(settings.alert_buffer_cap);
        Self {
            inner: Arc::new(Inner {
                aggregator,
                store,
                settings,
                state: RwLock::new(state),
                cycle_lock: Mutex::new(()),
                stop_tx: Mutex::new(None),
            }),
        }
    }

    /// Arm the loop: one cycle now, then adaptive sleeps. Returns `false`
    /// (and does nothing) when already running.
    pub async fn start(&self) -> bool {
        let mut stop_tx = self.inner.stop_tx.lock().await;
        {
            let mut state = self.inner.state.write().await;
            if state.running {
                info!("Poller already running, start ignored");
                return false;
            }
            state.running = true;
        }

        let (tx, rx) = watch::channel(false);
        *stop_tx = Some(tx);
        drop(stop_tx);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { run_loop(inner, rx).await });
        info!("Poller started");
        true
    }

    /// Cancel the pending sleep. An in-flight cycle still completes.
    /// Returns `false` when already stopped.
    pub async fn stop(&self) -> bool {
        let mut stop_tx = self.inner.stop_tx.lock().await;
        {
            let mut state = self.inner.state.write().await;
            if !state.running {
                debug!("Poller already stopped");
                return false;
            }
            state.running = false;
        }
        if let Some(tx) = stop_tx.take() {
            let _ = tx.send(true);
        }
        info!("Poller stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.read().await.running
    }

    /// Run one cycle now without touching the timer.
    pub async fn trigger_manual_poll(&self) -> Result<CycleReport, TrackerError> {
        info!("Manual poll triggered");
        let report = self.inner.poll_cycle().await;
        match &report {
            Ok(r) => log_cycle_report(r),
            Err(e) => error!(error = %e, "Manual poll failed"),
        }
        report
    }

    pub async fn status(&self) -> PollStatus {
        let state = self.inner.state.read().await;
        PollStatus {
            running: state.running,
            last_poll_time: state.last_poll_time,
            cycle_count: state.cycle_count,
            is_within_trading_window: self.inner.settings.window.contains(&Local::now()),
            recent_alerts: state.alerts.recent(STATUS_RECENT_ALERTS),
        }
    }

    /// Newest first.
    pub async fn recent_alerts(&self, n: usize) -> Vec<AlertEvent> {
        self.inner.state.read().await.alerts.recent(n)
    }

    pub async fn clear_alerts(&self) -> usize {
        let mut state = self.inner.state.write().await;
        let n = state.alerts.len();
        state.alerts.clear();
        info!(cleared = n, "Alert buffer cleared");
        n
    }

    /// Snapshot of the previous-value maps.
    pub async fn baseline(&self) -> Baseline {
        let state = self.inner.state.read().await;
        Baseline {
            previous_totals: state.previous_totals.clone(),
            previous_premiums: state.previous_premiums.clone(),
            cycle_count: state.cycle_count,
            saved_at: Some(Utc::now()),
        }
    }

    /// Seed the previous-value maps. Keys already present are kept.
    pub async fn restore_baseline(&self, baseline: Baseline) {
        let _cycle = self.inner.cycle_lock.lock().await;
        let mut state = self.inner.state.write().await;
        for (k, v) in baseline.previous_totals {
            state.previous_totals.entry(k).or_insert(v);
        }
        for (k, v) in baseline.previous_premiums {
            state.previous_premiums.entry(k).or_insert(v);
        }
        state.cycle_count = state.cycle_count.max(baseline.cycle_count);
        info!(
            totals = state.previous_totals.len(),
            premiums = state.previous_premiums.len(),
            "Baseline restored"
        );
    }

    pub fn window(&self) -> &TradingWindow {
        &self.inner.settings.window
    }
}

async fn run_loop(inner: Arc<Inner>, mut stop_rx: watch::Receiver<bool>) {
    info!("Poll loop armed");
    loop {
        if *stop_rx.borrow() {
            break;
        }

        match AssertUnwindSafe(inner.poll_cycle()).catch_unwind().await {
            Ok(Ok(report)) => log_cycle_report(&report),
            Ok(Err(e)) => error!(error = %e, "Poll cycle failed, continuing"),
            Err(payload) => error!(panic = %panic_message(&*payload), "Poll cycle panicked, continuing"),
        }

        let delay = inner.settings.window.next_delay(&Local::now());
        debug!(delay_secs = delay.as_secs(), "Next poll scheduled");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => break,
        }
    }

    // Exiting without a stop request leaves nothing polling.
    let stopped = *stop_rx.borrow();
    if !stopped {
        inner.state.write().await.running = false;
    }
    info!("Poll loop exited");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Inner {
    async fn poll_cycle(&self) -> Result<CycleReport, TrackerError> {
        let _cycle = self.cycle_lock.lock().await;
        let started = Instant::now();

        let (subs, prems) = tokio::join!(
            self.aggregator.aggregate_subscriptions(&self.settings.subscription_sources),
            self.aggregator.aggregate_premiums(&self.settings.premium_sources),
        );
        let subs = subs?;
        let prems = prems?;

        let alerts = {
            let state = self.state.read().await;
            evaluate(
                &self.settings.rules,
                &subs.data,
                &prems.data,
                &state.previous_totals,
                &state.previous_premiums,
            )
        };

        let persistence_failures = self.persist(&subs.data).await + self.persist(&prems.data).await;

        let cycle_number = {
            let mut state = self.state.write().await;
            for rec in &subs.data {
                if let Some(total) = rec.fields.total {
                    state.previous_totals.insert(rec.key.clone(), total);
                }
            }
            for rec in &prems.data {
                if let Some(gmp) = rec.fields.gmp {
                    state.previous_premiums.insert(rec.key.clone(), gmp);
                }
            }
            state.alerts.extend(alerts.iter().cloned());
            state.cycle_count += 1;
            state.last_poll_time = Some(Utc::now());
            state.cycle_count
        };

        for alert in &alerts {
            match alert.severity {
                AlertSeverity::Critical | AlertSeverity::Warning => warn!(key = %alert.key, "{alert}"),
                AlertSeverity::Info => info!(key = %alert.key, "{alert}"),
            }
        }

        Ok(CycleReport {
            cycle_number,
            subscriptions: subs.data.len(),
            premiums: prems.data.len(),
            subscription_sources_ok: subs.successful_sources,
            premium_sources_ok: prems.successful_sources,
            alerts_raised: alerts.len(),
            persistence_failures,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        })
    }

    /// Upsert each record and append its headline value. Returns the
    /// number of failed writes.
    async fn persist(&self, records: &[ReconciledRecord]) -> usize {
        let mut failures = 0;
        for rec in records {
            if let Err(e) = self.store.upsert_by_symbol(rec).await {
                warn!(key = %rec.key, kind = %rec.kind, error = %e, "Failed to upsert offering");
                failures += 1;
            }

            let point = match (rec.fields.total, rec.fields.gmp) {
                (Some(total), _) if rec.kind == OperationKind::SubscriptionLevel => {
                    Some((SERIES_SUBSCRIPTION_TOTAL, total))
                }
                (_, Some(gmp)) if rec.kind == OperationKind::PremiumQuote => Some((SERIES_GMP, gmp)),
                _ => None,
            };
            if let Some((series, value)) = point {
                if let Err(e) = self.store.append_time_series(&rec.key, series, value, rec.last_updated).await {
                    warn!(key = %rec.key, series, error = %e, "Failed to append time series");
                    failures += 1;
                }
            }
        }
        failures
    }
}

fn log_cycle_report(report: &CycleReport) {
    info!(
        cycle = report.cycle_number,
        subscriptions = report.subscriptions,
        premiums = report.premiums,
        subscription_sources_ok = report.subscription_sources_ok,
        premium_sources_ok = report.premium_sources_ok,
        alerts = report.alerts_raised,
        persistence_failures = report.persistence_failures,
        duration_ms = report.duration_ms,
        "Poll cycle complete"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
