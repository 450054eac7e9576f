//! Upstream IPO data sources.
//!
//! Defines the `SourceAdapter` trait and the closed set of provider
//! implementations. Every operation returns a [`FetchResult`]; failures
//! never escape an adapter as an `Err`.
//!
//! Shared plumbing lives here: company-name key normalization, lenient
//! number parsing, the categorized [`FetchError`], and the bounded retry
//! loop every adapter runs its attempts through.

pub mod chittorgarh;
pub mod investorgain;
pub mod ipocentral;
pub mod nse;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::types::{FetchResult, OperationKind, RawRecord, SourceName};

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// Uniform fetch+parse contract implemented by every provider.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> SourceName;

    /// Whether this provider publishes data for `kind` at all.
    fn supports(&self, kind: OperationKind) -> bool;

    async fn fetch_listings(&self) -> FetchResult;

    async fn fetch_subscription_levels(&self) -> FetchResult;

    async fn fetch_premium_quotes(&self) -> FetchResult;

    /// Dispatch on operation kind.
    async fn fetch(&self, kind: OperationKind) -> FetchResult {
        match kind {
            OperationKind::Listing => self.fetch_listings().await,
            OperationKind::SubscriptionLevel => self.fetch_subscription_levels().await,
            OperationKind::PremiumQuote => self.fetch_premium_quotes().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a single fetch attempt failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0} does not publish {1} data")]
    Unsupported(SourceName, OperationKind),
}

impl FetchError {
    /// Client errors other than 408/429 will not improve on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) => true,
            FetchError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            FetchError::Parse(_) | FetchError::Unsupported(..) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(0)
        } else if e.is_decode() {
            FetchError::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Linear,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
            backoff: Backoff::Linear,
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &SourceConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delay: Duration::from_millis(cfg.retry_delay_ms),
            backoff: cfg.backoff,
            attempt_timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    /// Delay before attempt number `attempt` (1-based, so the first retry is attempt 2).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay * attempt.saturating_sub(1),
        }
    }
}

/// Run `attempt_fn` up to `policy.max_attempts` times and fold the outcome
/// into a [`FetchResult`]. Each attempt is bounded by the policy's timeout;
/// elapsed time covers every attempt and delay.
pub async fn fetch_with_retry<F, Fut>(
    source: SourceName,
    kind: OperationKind,
    policy: &RetryPolicy,
    mut attempt_fn: F,
) -> FetchResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<RawRecord>, FetchError>>,
{
    let started = Instant::now();
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            let delay = policy.delay_before(attempt);
            debug!(%source, %kind, attempt, delay_ms = delay.as_millis() as u64, "Retrying source fetch");
            tokio::time::sleep(delay).await;
        }

        let outcome = match tokio::time::timeout(policy.attempt_timeout, attempt_fn()).await {
            Ok(res) => res,
            Err(_) => Err(FetchError::Timeout(policy.attempt_timeout.as_millis() as u64)),
        };

        match outcome {
            Ok(mut records) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                for r in &mut records {
                    r.elapsed_ms = elapsed_ms;
                }
                debug!(%source, %kind, attempt, count = records.len(), elapsed_ms, "Source fetch ok");
                return FetchResult::ok(source, kind, records, elapsed_ms);
            }
            Err(e) => {
                warn!(%source, %kind, attempt, error = %e, "Source fetch attempt failed");
                let retryable = e.is_retryable();
                last_error = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let error = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempts made".to_string());
    FetchResult::failed(source, kind, error, elapsed_ms)
}

// ---------------------------------------------------------------------------
// HTTP helper
// ---------------------------------------------------------------------------

/// Thin JSON-over-HTTP client shared by the adapters.
#[derive(Clone)]
pub struct SourceHttp {
    http: Client,
    base_url: String,
}

impl SourceHttp {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; IPO-PULSE/0.1.0)")
            .build()
            .context("Failed to build source HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET `{base_url}{path}` and decode the body as JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        headers: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.get(&url).header("Accept", "application/json");
        for (name, value) in headers {
            req = req.header(*name, value);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Maximum length of a normalized key.
pub const KEY_MAX_LEN: usize = 15;

/// Legal/corporate tokens dropped before joining.
const NAME_SUFFIXES: &[&str] = &[
    "LIMITED", "LTD", "PRIVATE", "PVT", "INC", "INCORPORATED", "CORPORATION",
    "CORP", "COMPANY", "CO", "LLP", "PLC", "IPO", "SME", "NSE", "BSE",
];

/// Canonical join key for a free-text company name.
///
/// Upper-cases, drops suffix tokens, strips every non-alphanumeric and
/// truncates to [`KEY_MAX_LEN`]. Two different companies can collide.
pub fn normalize_key(name: &str) -> String {
    let upper = name.to_uppercase();
    let tokens: Vec<&str> = upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let kept: String = tokens
        .iter()
        .filter(|t| !NAME_SUFFIXES.contains(t))
        .copied()
        .collect();

    // A name made only of suffix words ("Company Ltd") keeps its tokens.
    let joined = if kept.is_empty() { tokens.concat() } else { kept };
    joined.chars().take(KEY_MAX_LEN).collect()
}

/// Lenient numeric parse for scraped text: "₹1,250", "Rs.95", "12.5x",
/// "45%", "₹245 (22.5%)". Takes the first number in the text.
pub fn parse_number(raw: &str) -> Option<f64> {
    let chars: Vec<char> = raw.trim().chars().collect();
    let start = (0..chars.len()).find(|&i| {
        chars[i].is_ascii_digit()
            || (chars[i] == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
    })?;

    let number: String = chars[start..]
        .iter()
        .enumerate()
        .take_while(|(i, c)| c.is_ascii_digit() || **c == ',' || **c == '.' || (*i == 0 && **c == '-'))
        .map(|(_, c)| *c)
        .filter(|c| *c != ',')
        .collect();

    number
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// "₹95 to ₹100" / "95-100" / "100" → (low, high).
pub fn parse_price_band(raw: &str) -> (Option<f64>, Option<f64>) {
    let normalized = raw.replace(" to ", "-").replace('–', "-");
    let values: Vec<f64> = normalized.split('-').filter_map(parse_number).collect();
    (values.first().copied(), values.last().copied())
}

/// Accepts either a JSON number or a numeric-looking string.
pub fn value_as_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// Trimmed, non-empty string or `None`.
pub fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty() && *s != "-" && !s.eq_ignore_ascii_case("na"))
        .map(String::from)
}

/// Remove markup from a scraped cell: `<a href="..">Name</a>` → `Name`.
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&").replace("&nbsp;", " ").trim().to_string()
}

// ---------------------------------------------------------------------------
// Report tables
// ---------------------------------------------------------------------------

/// `{"reportTableData": [{column: value, ..}, ..]}`, the shape used by the
/// report-style providers. Column names vary between reports, so rows stay
/// untyped and are read through [`cell`].
#[derive(Debug, Default, serde::Deserialize)]
pub struct ReportTable {
    #[serde(default, rename = "reportTableData")]
    pub rows: Vec<HashMap<String, serde_json::Value>>,
}

/// First cell whose column name matches one of `names` (case-insensitive).
/// Exact matches beat prefix matches; earlier names beat later ones.
pub fn cell<'a>(row: &'a HashMap<String, serde_json::Value>, names: &[&str]) -> Option<&'a serde_json::Value> {
    for name in names {
        let want = name.to_lowercase();
        if let Some((_, v)) = row.iter().find(|(k, _)| k.to_lowercase() == want) {
            return Some(v);
        }
    }
    for name in names {
        let want = name.to_lowercase();
        let mut matches: Vec<(&String, &serde_json::Value)> = row
            .iter()
            .filter(|(k, _)| k.to_lowercase().starts_with(&want))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(b.0));
        if let Some((_, v)) = matches.first() {
            return Some(v);
        }
    }
    None
}

pub fn cell_text(row: &HashMap<String, serde_json::Value>, names: &[&str]) -> Option<String> {
    match cell(row, names)? {
        serde_json::Value::String(s) => non_empty(Some(strip_tags(s).as_str())),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn cell_num(row: &HashMap<String, serde_json::Value>, names: &[&str]) -> Option<f64> {
    match cell(row, names)? {
        serde_json::Value::String(s) => parse_number(&strip_tags(s)),
        other => value_as_f64(other),
    }
}

/// Build the configured adapters, skipping disabled ones.
pub fn build_adapters(
    cfg: &crate::config::SourcesConfig,
) -> anyhow::Result<Vec<std::sync::Arc<dyn SourceAdapter>>> {
    use std::sync::Arc;
    let mut out: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    if let Some(c) = cfg.nse.as_ref().filter(|c| c.enabled) {
        out.push(Arc::new(nse::NseAdapter::new(c)?));
    }
    if let Some(c) = cfg.chittorgarh.as_ref().filter(|c| c.enabled) {
        out.push(Arc::new(chittorgarh::ChittorgarhAdapter::new(c)?));
    }
    if let Some(c) = cfg.investorgain.as_ref().filter(|c| c.enabled) {
        out.push(Arc::new(investorgain::InvestorGainAdapter::new(c)?));
    }
    if let Some(c) = cfg.ipocentral.as_ref().filter(|c| c.enabled) {
        out.push(Arc::new(ipocentral::IpoCentralAdapter::new(c)?));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
