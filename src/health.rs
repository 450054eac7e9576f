//! Per-source health tracking.
//!
//! Every adapter invocation is recorded as a call event (success flag and
//! latency). Stats and status are derived over a trailing window on read.
//! Recording happens in [`MonitoredSource`], a decorator around an
//! adapter, so nothing upstream needs to know the monitor exists.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::config::HealthConfig;
use crate::sources::SourceAdapter;
use crate::types::{FetchResult, OperationKind, SourceName};

/// Success rate at or above which a source is healthy.
const HEALTHY_RATE: f64 = 0.8;
/// Success rate at or above which a source is degraded rather than down.
const DEGRADED_RATE: f64 = 0.5;
/// Healthy sources needed for the overall status to be healthy.
const OVERALL_HEALTHY_MIN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl HealthStatus {
    pub fn from_rate(calls: u64, successes: u64) -> Self {
        if calls == 0 {
            return HealthStatus::Down;
        }
        let rate = successes as f64 / calls as f64;
        if rate >= HEALTHY_RATE {
            HealthStatus::Healthy
        } else if rate >= DEGRADED_RATE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Down
        }
    }
}

/// Windowed counters for one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source: SourceName,
    pub calls: u64,
    pub successes: u64,
    pub errors: u64,
    pub total_latency_ms: u64,
    pub avg_latency_ms: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallHealth {
    pub status: HealthStatus,
    pub healthy_sources: usize,
    pub total_sources: usize,
    pub window_mins: i64,
    pub sources: Vec<SourceStats>,
}

#[derive(Debug, Clone)]
struct CallEvent {
    at: DateTime<Utc>,
    kind: OperationKind,
    success: bool,
    latency_ms: u64,
    error: Option<String>,
}

/// Thread-safe call log keyed by source.
pub struct HealthMonitor {
    events: Mutex<HashMap<SourceName, VecDeque<CallEvent>>>,
    retention: Duration,
    default_window: Duration,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(&HealthConfig::default())
    }
}

impl HealthMonitor {
    pub fn new(cfg: &HealthConfig) -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            retention: Duration::try_hours(cfg.retention_hours.max(1)).unwrap_or(Duration::MAX),
            default_window: Duration::try_minutes(cfg.default_window_mins.max(1)).unwrap_or(Duration::MAX),
        }
    }

    pub fn default_window(&self) -> Duration {
        self.default_window
    }

    /// Oldest event age kept. Wider windows see nothing more.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Record one completed adapter invocation.
    pub fn record(&self, result: &FetchResult) {
        self.record_at(result, Utc::now());
    }

    pub fn record_at(&self, result: &FetchResult, at: DateTime<Utc>) {
        let event = CallEvent {
            at,
            kind: result.kind,
            success: result.success,
            latency_ms: result.elapsed_ms,
            error: result.error.clone(),
        };
        let mut events = match self.events.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let log = events.entry(result.source).or_default();
        log.push_back(event);

        let horizon = at.checked_sub_signed(self.retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        while log.front().is_some_and(|e| e.at < horizon) {
            log.pop_front();
        }
        debug!(source = %result.source, kind = %result.kind, success = result.success, "Source call recorded");
    }

    /// Stats for one source over the trailing `window`.
    pub fn stats(&self, source: SourceName, window: Duration) -> SourceStats {
        self.stats_at(source, window, Utc::now())
    }

    pub fn stats_at(&self, source: SourceName, window: Duration, now: DateTime<Utc>) -> SourceStats {
        let since = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let events = match self.events.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut stats = SourceStats {
            source,
            calls: 0,
            successes: 0,
            errors: 0,
            total_latency_ms: 0,
            avg_latency_ms: 0.0,
            last_success: None,
            last_error: None,
            last_error_message: None,
            status: HealthStatus::Down,
        };

        if let Some(log) = events.get(&source) {
            for e in log.iter().filter(|e| e.at >= since && e.at <= now) {
                stats.calls += 1;
                stats.total_latency_ms += e.latency_ms;
                if e.success {
                    stats.successes += 1;
                    stats.last_success = Some(e.at);
                } else {
                    stats.errors += 1;
                    stats.last_error = Some(e.at);
                    stats.last_error_message = e.error.clone().map(|m| format!("{}: {m}", e.kind));
                }
            }
        }

        if stats.calls > 0 {
            stats.avg_latency_ms = stats.total_latency_ms as f64 / stats.calls as f64;
        }
        stats.status = HealthStatus::from_rate(stats.calls, stats.successes);
        stats
    }

    /// Stats for every known source.
    pub fn all_stats(&self, window: Duration) -> Vec<SourceStats> {
        let now = Utc::now();
        SourceName::ALL.iter().map(|s| self.stats_at(*s, window, now)).collect()
    }

    /// Overall status across the full provider set.
    pub fn overall(&self, window: Duration) -> OverallHealth {
        let sources = self.all_stats(window);
        let healthy = sources.iter().filter(|s| s.status == HealthStatus::Healthy).count();
        let status = if healthy >= OVERALL_HEALTHY_MIN {
            HealthStatus::Healthy
        } else if healthy >= 1 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Down
        };
        if status != HealthStatus::Healthy {
            warn!(healthy, total = sources.len(), status = ?status, "Source health below target");
        }
        OverallHealth {
            status,
            healthy_sources: healthy,
            total_sources: sources.len(),
            window_mins: window.num_minutes(),
            sources,
        }
    }
}

// ---------------------------------------------------------------------------
// Decorator
// ---------------------------------------------------------------------------

/// Wraps an adapter and records every call it completes.
pub struct MonitoredSource {
    inner: Arc<dyn SourceAdapter>,
    monitor: Arc<HealthMonitor>,
}

impl MonitoredSource {
    pub fn wrap(inner: Arc<dyn SourceAdapter>, monitor: Arc<HealthMonitor>) -> Arc<dyn SourceAdapter> {
        Arc::new(Self { inner, monitor })
    }

    fn observe(&self, result: FetchResult) -> FetchResult {
        self.monitor.record(&result);
        result
    }
}

#[async_trait]
impl SourceAdapter for MonitoredSource {
    fn name(&self) -> SourceName {
        self.inner.name()
    }

    fn supports(&self, kind: OperationKind) -> bool {
        self.inner.supports(kind)
    }

    async fn fetch_listings(&self) -> FetchResult {
        self.observe(self.inner.fetch_listings().await)
    }

    async fn fetch_subscription_levels(&self) -> FetchResult {
        self.observe(self.inner.fetch_subscription_levels().await)
    }

    async fn fetch_premium_quotes(&self) -> FetchResult {
        self.observe(self.inner.fetch_premium_quotes().await)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
