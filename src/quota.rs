//! Daily request quotas per credential.
//!
//! Each credential maps to a tier and each tier to a daily ceiling. Usage
//! is scoped to the local calendar day and resets implicitly the first
//! time a credential is seen on a new day.
//!
//! Checking and counting are separate steps: [`QuotaLedger::check`] gates a
//! request and [`QuotaLedger::record_request`] counts it once it has been
//! served. Two concurrent requests can both pass the check before either is
//! counted, so the ceiling is advisory.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Days, Local, NaiveDate, TimeZone};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::config::QuotaConfig;

/// Header carrying the caller's credential.
pub const API_KEY_HEADER: &str = "x-api-key";

const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceiling {
    Limited(u64),
    Unlimited,
}

impl Ceiling {
    /// Negative config values mean unlimited.
    pub fn from_config(v: i64) -> Self {
        if v < 0 {
            Ceiling::Unlimited
        } else {
            Ceiling::Limited(v as u64)
        }
    }
}

/// Usage counter for one credential.
#[derive(Debug, Clone, Serialize)]
pub struct UsageQuota {
    pub tier: String,
    pub used: u64,
    pub day: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub tier: String,
    /// `None` when the tier is unlimited.
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: DateTime<Local>,
}

pub struct QuotaLedger {
    tiers: HashMap<String, Ceiling>,
    credentials: HashMap<String, String>,
    default_tier: String,
    usage: Mutex<HashMap<String, UsageQuota>>,
}

impl QuotaLedger {
    pub fn new(cfg: &QuotaConfig) -> Self {
        let tiers = cfg
            .tiers
            .iter()
            .map(|(name, v)| (name.clone(), Ceiling::from_config(*v)))
            .collect();
        Self {
            tiers,
            credentials: cfg.credentials.clone(),
            default_tier: cfg.default_tier.clone(),
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Tier for `credential`. Unknown or missing credentials get the default tier.
    pub fn tier_of(&self, credential: Option<&str>) -> String {
        credential
            .and_then(|c| self.credentials.get(c))
            .cloned()
            .unwrap_or_else(|| self.default_tier.clone())
    }

    fn ceiling(&self, tier: &str) -> Ceiling {
        // A tier missing from config allows nothing rather than everything.
        self.tiers.get(tier).copied().unwrap_or(Ceiling::Limited(0))
    }

    /// Bucket a request is counted under. Only configured credentials get
    /// their own; everything else shares the anonymous one.
    fn usage_key(&self, credential: Option<&str>) -> String {
        credential
            .filter(|c| self.credentials.contains_key(*c))
            .unwrap_or(ANONYMOUS)
            .to_string()
    }

    pub fn check(&self, credential: Option<&str>) -> QuotaDecision {
        self.check_at(credential, Local::now())
    }

    pub fn check_at<Tz: TimeZone>(&self, credential: Option<&str>, now: DateTime<Tz>) -> QuotaDecision {
        let now = now.with_timezone(&Local);
        let today = now.date_naive();
        let tier = self.tier_of(credential);
        let ceiling = self.ceiling(&tier);

        let used = {
            let usage = match self.usage.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            usage
                .get(&self.usage_key(credential))
                .filter(|u| u.day == today)
                .map(|u| u.used)
                .unwrap_or(0)
        };

        let (allowed, limit, remaining) = match ceiling {
            Ceiling::Unlimited => (true, None, None),
            Ceiling::Limited(max) => (used < max, Some(max), Some(max.saturating_sub(used))),
        };

        QuotaDecision {
            allowed,
            tier,
            limit,
            remaining,
            reset_at: next_local_midnight(today),
        }
    }

    /// Count one served request against `credential`.
    pub fn record_request(&self, credential: Option<&str>) {
        self.record_request_at(credential, Local::now());
    }

    pub fn record_request_at<Tz: TimeZone>(&self, credential: Option<&str>, now: DateTime<Tz>) {
        let today = now.with_timezone(&Local).date_naive();
        let tier = self.tier_of(credential);
        let mut usage = match self.usage.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = usage
            .entry(self.usage_key(credential))
            .or_insert_with(|| UsageQuota { tier: tier.clone(), used: 0, day: today });
        if entry.day != today {
            debug!(tier = %entry.tier, "Quota day rolled over");
            entry.day = today;
            entry.used = 0;
        }
        entry.tier = tier;
        entry.used += 1;
    }

    pub fn usage(&self, credential: Option<&str>) -> Option<UsageQuota> {
        let usage = match self.usage.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        usage.get(&self.usage_key(credential)).cloned()
    }
}

/// Start of the next local day. Falls back to +24h when local midnight
/// does not exist (DST gap).
fn next_local_midnight(today: NaiveDate) -> DateTime<Local> {
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    let naive = tomorrow.and_hms_opt(0, 0, 0).unwrap_or_default();
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| Local::now() + chrono::Duration::hours(24))
}

// ---------------------------------------------------------------------------
// HTTP middleware
// ---------------------------------------------------------------------------

pub fn credential_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn apply_headers(headers: &mut HeaderMap, decision: &QuotaDecision) {
    let limit = decision.limit.map(|l| l.to_string()).unwrap_or_else(|| "unlimited".into());
    let remaining = decision.remaining.map(|r| r.to_string()).unwrap_or_else(|| "unlimited".into());
    let reset = decision.reset_at.timestamp().to_string();
    for (name, value) in [
        ("x-ratelimit-limit", limit),
        ("x-ratelimit-remaining", remaining),
        ("x-ratelimit-reset", reset),
    ] {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    }
}

/// Gate a route on the caller's quota. Counts the request after the inner
/// handler has answered, whatever its status.
pub async fn enforce(State(ledger): State<Arc<QuotaLedger>>, req: Request, next: Next) -> Response {
    let credential = credential_from(req.headers());
    let decision = ledger.check(credential.as_deref());

    if !decision.allowed {
        warn!(tier = %decision.tier, "Daily quota exhausted");
        let body = Json(serde_json::json!({
            "error": "daily quota exceeded",
            "tier": decision.tier,
            "reset_at": decision.reset_at,
        }));
        let mut resp = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
        apply_headers(resp.headers_mut(), &decision);
        return resp;
    }

    let mut resp = next.run(req).await;
    ledger.record_request(credential.as_deref());

    let after = ledger.check(credential.as_deref());
    apply_headers(resp.headers_mut(), &after);
    resp
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
