//! NSE (National Stock Exchange) current-issue feed.
//!
//! Authoritative for listing metadata and live bid-book subscription of
//! issues currently open on the exchange. Publishes no grey-market data.
//!
//! API: `{base_url}/api/ipo-current-issue`
//! Auth: none, but the exchange rejects requests without a browser-like
//! user agent.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{
    fetch_with_retry, non_empty, parse_price_band, value_as_f64, FetchError,
    RetryPolicy, SourceAdapter, SourceHttp,
};
use crate::config::SourceConfig;
use crate::types::{FetchResult, OfferingFields, OperationKind, RawRecord, SourceName};

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// One row of the current-issue feed. Every field is optional; the exchange
/// omits or blanks fields freely between listing phases.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NseIssue {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    company_name: Option<String>,
    /// "EQ" for mainboard, "SME" for the SME platform.
    #[serde(default)]
    series: Option<String>,
    #[serde(default)]
    issue_start_date: Option<String>,
    #[serde(default)]
    issue_end_date: Option<String>,
    /// "Rs.95 to Rs.100"
    #[serde(default)]
    issue_price: Option<String>,
    /// Times subscribed overall, sent as a string or a number.
    #[serde(default)]
    no_of_time: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct NseAdapter {
    http: SourceHttp,
    retry: RetryPolicy,
}

impl NseAdapter {
    pub fn new(cfg: &SourceConfig) -> Result<Self> {
        Ok(Self {
            http: SourceHttp::new(&cfg.base_url, Duration::from_secs(cfg.timeout_secs))?,
            retry: RetryPolicy::from_config(cfg),
        })
    }

    async fn fetch_issues(&self) -> Result<Vec<NseIssue>, FetchError> {
        let path = format!("/api/ipo-current-issue?category={}", urlencoding::encode("ipo"));
        self.http.get_json(&path, &[]).await
    }

    fn to_fields(issue: &NseIssue) -> OfferingFields {
        let (low, high) = issue
            .issue_price
            .as_deref()
            .map(parse_price_band)
            .unwrap_or((None, None));
        OfferingFields {
            company_name: non_empty(issue.company_name.as_deref()),
            symbol: non_empty(issue.symbol.as_deref()),
            board: issue.series.as_deref().map(|s| {
                if s.eq_ignore_ascii_case("sme") { "sme".to_string() } else { "mainboard".to_string() }
            }),
            open_date: non_empty(issue.issue_start_date.as_deref()),
            close_date: non_empty(issue.issue_end_date.as_deref()),
            price_band_low: low,
            price_band_high: high,
            ..Default::default()
        }
    }

    fn parse_listings(issues: &[NseIssue]) -> Vec<RawRecord> {
        issues
            .iter()
            .filter_map(|i| RawRecord::from_fields(SourceName::Nse, OperationKind::Listing, Self::to_fields(i)))
            .collect()
    }

    fn parse_subscriptions(issues: &[NseIssue]) -> Vec<RawRecord> {
        issues
            .iter()
            .filter_map(|i| {
                let total = i.no_of_time.as_ref().and_then(value_as_f64)?;
                let fields = OfferingFields {
                    total: Some(total),
                    ..Self::to_fields(i)
                };
                RawRecord::from_fields(SourceName::Nse, OperationKind::SubscriptionLevel, fields)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for NseAdapter {
    fn name(&self) -> SourceName {
        SourceName::Nse
    }

    fn supports(&self, kind: OperationKind) -> bool {
        matches!(kind, OperationKind::Listing | OperationKind::SubscriptionLevel)
    }

    async fn fetch_listings(&self) -> FetchResult {
        fetch_with_retry(SourceName::Nse, OperationKind::Listing, &self.retry, move || async move {
            Ok::<_, FetchError>(Self::parse_listings(&self.fetch_issues().await?))
        })
        .await
    }

    async fn fetch_subscription_levels(&self) -> FetchResult {
        fetch_with_retry(SourceName::Nse, OperationKind::SubscriptionLevel, &self.retry, move || async move {
            Ok::<_, FetchError>(Self::parse_subscriptions(&self.fetch_issues().await?))
        })
        .await
    }

    async fn fetch_premium_quotes(&self) -> FetchResult {
        let err = FetchError::Unsupported(SourceName::Nse, OperationKind::PremiumQuote);
        FetchResult::failed(SourceName::Nse, OperationKind::PremiumQuote, err.to_string(), 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
