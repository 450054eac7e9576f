//! Alert rules over consecutive reconciled snapshots.
//!
//! [`evaluate`] is a pure function: it reads the current subscription and
//! premium records plus the previous-value maps and returns the alerts to
//! raise, in record order. The scheduler owns the maps and the
//! [`AlertBuffer`] the results land in.

use serde_json::json;
use std::collections::{HashMap, VecDeque};

use crate::config::AlertsConfig;
use crate::types::{AlertEvent, AlertSeverity, AlertType, ReconciledRecord};

/// Alert thresholds.
#[derive(Debug, Clone)]
pub struct AlertRules {
    /// Subscription total at or above which demand is "extreme".
    pub critical_subscription: f64,
    /// Subscription total at or above which demand is "high".
    pub warning_subscription: f64,
    /// Minimum rise in total between cycles for a momentum alert.
    pub momentum_delta: f64,
    /// Minimum absolute premium change, in percent.
    pub premium_change_pct: f64,
}

impl Default for AlertRules {
    fn default() -> Self {
        Self::from(&AlertsConfig::default())
    }
}

impl From<&AlertsConfig> for AlertRules {
    fn from(cfg: &AlertsConfig) -> Self {
        Self {
            critical_subscription: cfg.critical_subscription,
            warning_subscription: cfg.warning_subscription,
            momentum_delta: cfg.momentum_delta,
            premium_change_pct: cfg.premium_change_pct,
        }
    }
}

/// Evaluate every rule against one cycle's records.
pub fn evaluate(
    rules: &AlertRules,
    subscriptions: &[ReconciledRecord],
    premiums: &[ReconciledRecord],
    previous_totals: &HashMap<String, f64>,
    previous_premiums: &HashMap<String, f64>,
) -> Vec<AlertEvent> {
    let mut alerts = Vec::new();

    for rec in subscriptions {
        let Some(total) = rec.fields.total else { continue };

        if total >= rules.critical_subscription {
            alerts.push(AlertEvent::new(
                AlertType::Threshold,
                AlertSeverity::Critical,
                &rec.key,
                format!("Extreme demand: subscribed {total:.2}x"),
                json!({ "total": total, "threshold": rules.critical_subscription }),
            ));
        } else if total >= rules.warning_subscription {
            alerts.push(AlertEvent::new(
                AlertType::Threshold,
                AlertSeverity::Warning,
                &rec.key,
                format!("High demand: subscribed {total:.2}x"),
                json!({ "total": total, "threshold": rules.warning_subscription }),
            ));
        }

        if let Some(&previous) = previous_totals.get(&rec.key) {
            let delta = total - previous;
            if delta >= rules.momentum_delta {
                alerts.push(AlertEvent::new(
                    AlertType::Momentum,
                    AlertSeverity::Warning,
                    &rec.key,
                    format!("Subscription jumped {previous:.2}x -> {total:.2}x (+{delta:.2})"),
                    json!({ "previous": previous, "current": total, "delta": delta }),
                ));
            }
        }
    }

    for rec in premiums {
        let Some(current) = rec.fields.gmp else { continue };
        let Some(&previous) = previous_premiums.get(&rec.key) else { continue };
        if previous == 0.0 {
            continue;
        }

        let pct = (current - previous) / previous.abs() * 100.0;
        if pct.abs() < rules.premium_change_pct {
            continue;
        }

        let (alert_type, severity, verb) = if current > previous {
            (AlertType::PremiumSpike, AlertSeverity::Info, "rose")
        } else {
            (AlertType::PremiumDrop, AlertSeverity::Warning, "fell")
        };
        alerts.push(AlertEvent::new(
            alert_type,
            severity,
            &rec.key,
            format!("Premium {verb} {previous:.2} -> {current:.2} ({pct:+.1}%)"),
            json!({ "previous": previous, "current": current, "change_pct": pct }),
        ));
    }

    alerts
}

// ---------------------------------------------------------------------------
// Bounded buffer
// ---------------------------------------------------------------------------

/// Ring of recent alerts. Oldest entries are evicted on push once the cap
/// is reached, so `len() <= cap` always holds.
#[derive(Debug, Clone)]
pub struct AlertBuffer {
    cap: usize,
    events: VecDeque<AlertEvent>,
}

impl AlertBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            events: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, event: AlertEvent) {
        self.events.push_back(event);
        while self.events.len() > self.cap {
            self.events.pop_front();
        }
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = AlertEvent>) {
        for e in events {
            self.push(e);
        }
    }

    /// Up to `n` alerts, newest first.
    pub fn recent(&self, n: usize) -> Vec<AlertEvent> {
        self.events.iter().rev().take(n).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
