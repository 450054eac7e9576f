//! Shared types for the IPO-PULSE tracker.
//!
//! These types form the data model used across all modules.
//! Source adapters produce [`RawRecord`]s, the aggregator folds them into
//! [`ReconciledRecord`]s, and the alert engine emits [`AlertEvent`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The closed set of upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceName {
    Nse,
    Chittorgarh,
    InvestorGain,
    IpoCentral,
}

impl SourceName {
    /// Every provider, in the order used for overall health membership.
    pub const ALL: &'static [SourceName] = &[
        SourceName::Nse,
        SourceName::Chittorgarh,
        SourceName::InvestorGain,
        SourceName::IpoCentral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceName::Nse => "nse",
            SourceName::Chittorgarh => "chittorgarh",
            SourceName::InvestorGain => "investorgain",
            SourceName::IpoCentral => "ipocentral",
        }
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a source name (case-insensitive, a few common aliases accepted).
impl std::str::FromStr for SourceName {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nse" | "nseindia" => Ok(SourceName::Nse),
            "chittorgarh" => Ok(SourceName::Chittorgarh),
            "investorgain" | "investor_gain" => Ok(SourceName::InvestorGain),
            "ipocentral" | "ipo_central" => Ok(SourceName::IpoCentral),
            other => Err(TrackerError::UnknownSource(other.to_string())),
        }
    }
}

/// What kind of observation a fetch produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Listing,
    SubscriptionLevel,
    PremiumQuote,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Listing => write!(f, "listing"),
            OperationKind::SubscriptionLevel => write!(f, "subscription"),
            OperationKind::PremiumQuote => write!(f, "premium"),
        }
    }
}

/// Qualitative trust label derived from how many sources corroborate a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Two or more corroborating sources is high. A lone source is medium
    /// when at least two sources were asked, otherwise low.
    pub fn assess(attribution_len: usize, total_sources_queried: usize) -> Self {
        if attribution_len >= 2 {
            Confidence::High
        } else if attribution_len == 1 && total_sources_queried >= 2 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
        }
    }
}

/// Direction of a premium over one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

/// Premium moves within this band (either side) count as stable.
pub const TREND_BAND: f64 = 5.0;

impl Trend {
    pub fn classify(first: f64, latest: f64) -> Self {
        let delta = latest - first;
        if delta > TREND_BAND {
            Trend::Rising
        } else if delta < -TREND_BAND {
            Trend::Falling
        } else {
            Trend::Stable
        }
    }
}

// ---------------------------------------------------------------------------
// Offering fields
// ---------------------------------------------------------------------------

/// Every value a source may report about an offering. All nullable:
/// a source fills in only what its payload carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferingFields {
    pub company_name: Option<String>,
    pub symbol: Option<String>,
    /// "mainboard" | "sme"
    pub board: Option<String>,
    pub open_date: Option<String>,
    pub close_date: Option<String>,
    pub listing_date: Option<String>,
    pub price_band_low: Option<f64>,
    pub price_band_high: Option<f64>,
    pub lot_size: Option<u32>,
    /// Issue size in crore.
    pub issue_size_cr: Option<f64>,

    // Subscription multiples (times subscribed).
    pub qib: Option<f64>,
    pub nii: Option<f64>,
    pub retail: Option<f64>,
    pub employee: Option<f64>,
    pub total: Option<f64>,

    // Grey market.
    pub gmp: Option<f64>,
    pub gmp_percent: Option<f64>,
    pub estimated_listing_price: Option<f64>,
    pub kostak: Option<f64>,
    pub subject_to_sauda: Option<f64>,
}

/// Keep `slot` if it already has a value, otherwise take `incoming`.
fn fill<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if slot.is_none() {
        if let Some(v) = incoming {
            *slot = Some(v.clone());
        }
    }
}

impl OfferingFields {
    /// Merge `other` into `self`; existing non-null values win.
    pub fn merge_from(&mut self, other: &OfferingFields) {
        fill(&mut self.company_name, &other.company_name);
        fill(&mut self.symbol, &other.symbol);
        fill(&mut self.board, &other.board);
        fill(&mut self.open_date, &other.open_date);
        fill(&mut self.close_date, &other.close_date);
        fill(&mut self.listing_date, &other.listing_date);
        fill(&mut self.price_band_low, &other.price_band_low);
        fill(&mut self.price_band_high, &other.price_band_high);
        fill(&mut self.lot_size, &other.lot_size);
        fill(&mut self.issue_size_cr, &other.issue_size_cr);
        fill(&mut self.qib, &other.qib);
        fill(&mut self.nii, &other.nii);
        fill(&mut self.retail, &other.retail);
        fill(&mut self.employee, &other.employee);
        fill(&mut self.total, &other.total);
        fill(&mut self.gmp, &other.gmp);
        fill(&mut self.gmp_percent, &other.gmp_percent);
        fill(&mut self.estimated_listing_price, &other.estimated_listing_price);
        fill(&mut self.kostak, &other.kostak);
        fill(&mut self.subject_to_sauda, &other.subject_to_sauda);
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One observation from one source for one operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub key: String,
    pub source: SourceName,
    pub kind: OperationKind,
    pub fields: OfferingFields,
    pub fetched_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RawRecord {
    /// Build a record, deriving the key from the company name.
    /// Returns `None` when the name normalizes to nothing.
    pub fn from_fields(
        source: SourceName,
        kind: OperationKind,
        fields: OfferingFields,
    ) -> Option<Self> {
        let key = crate::sources::normalize_key(fields.company_name.as_deref()?);
        if key.is_empty() {
            return None;
        }
        Some(Self {
            key,
            source,
            kind,
            fields,
            fetched_at: Utc::now(),
            elapsed_ms: 0,
        })
    }
}

/// The merged view of one offering for one operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub key: String,
    pub kind: OperationKind,
    pub fields: OfferingFields,
    /// Contributing sources in first-seen order.
    pub attribution: Vec<SourceName>,
    pub confidence: Confidence,
    pub last_updated: DateTime<Utc>,
    /// Premium passes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

impl fmt::Display for ReconciledRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<&str> = self.attribution.iter().map(|s| s.as_str()).collect();
        write!(
            f,
            "[{}] {} ({} | {})",
            self.kind,
            self.key,
            self.confidence,
            sources.join(", ")
        )
    }
}

/// Outcome of one adapter operation. Never an `Err`: failures are carried
/// in `success`/`error` with empty `data`.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub success: bool,
    pub data: Vec<RawRecord>,
    pub source: SourceName,
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl FetchResult {
    pub fn ok(source: SourceName, kind: OperationKind, data: Vec<RawRecord>, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            data,
            source,
            kind,
            timestamp: Utc::now(),
            error: None,
            elapsed_ms,
        }
    }

    pub fn failed(
        source: SourceName,
        kind: OperationKind,
        error: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            source,
            kind,
            timestamp: Utc::now(),
            error: Some(error.into()),
            elapsed_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Threshold,
    Momentum,
    PremiumSpike,
    PremiumDrop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "INFO"),
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A raised alert. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub key: String,
    pub message: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        key: &str,
        message: String,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            key: key.to_string(),
            message,
            payload,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.key, self.message)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for IPO-PULSE.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Offering not found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
