//! IPO Central grey-market API.
//!
//! JSON feed of current issues with their grey-market premium, expected
//! listing price and price band. Serves premium quotes and basic listing
//! metadata; no subscription data.
//!
//! API: `{base_url}/api/v1/gmp`
//! Auth: optional key sent as `x-api-key`.

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::{
    fetch_with_retry, non_empty, parse_price_band, value_as_f64, FetchError, RetryPolicy,
    SourceAdapter, SourceHttp,
};
use crate::config::SourceConfig;
use crate::types::{FetchResult, OfferingFields, OperationKind, RawRecord, SourceName};

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct GmpResponse {
    #[serde(default)]
    data: Vec<GmpEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct GmpEntry {
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    gmp: Option<serde_json::Value>,
    #[serde(default)]
    gmp_percent: Option<serde_json::Value>,
    #[serde(default)]
    expected_listing: Option<serde_json::Value>,
    #[serde(default)]
    price_band: Option<String>,
    #[serde(default)]
    open_date: Option<String>,
    #[serde(default)]
    close_date: Option<String>,
    #[serde(default)]
    listing_date: Option<String>,
    #[serde(default)]
    board: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct IpoCentralAdapter {
    http: SourceHttp,
    retry: RetryPolicy,
    api_key: Option<SecretString>,
}

impl IpoCentralAdapter {
    pub fn new(cfg: &SourceConfig) -> Result<Self> {
        Ok(Self {
            http: SourceHttp::new(&cfg.base_url, Duration::from_secs(cfg.timeout_secs))?,
            retry: RetryPolicy::from_config(cfg),
            api_key: cfg.api_key(),
        })
    }

    async fn fetch_entries(&self) -> Result<Vec<GmpEntry>, FetchError> {
        let headers: Vec<(&str, String)> = self
            .api_key
            .as_ref()
            .map(|k| vec![("x-api-key", k.expose_secret().clone())])
            .unwrap_or_default();
        let resp: GmpResponse = self.http.get_json("/api/v1/gmp", &headers).await?;
        Ok(resp.data)
    }

    fn listing_fields(entry: &GmpEntry) -> OfferingFields {
        let (low, high) = entry
            .price_band
            .as_deref()
            .map(parse_price_band)
            .unwrap_or((None, None));
        OfferingFields {
            company_name: non_empty(entry.company.as_deref()),
            board: non_empty(entry.board.as_deref()).map(|b| b.to_lowercase()),
            open_date: non_empty(entry.open_date.as_deref()),
            close_date: non_empty(entry.close_date.as_deref()),
            listing_date: non_empty(entry.listing_date.as_deref()),
            price_band_low: low,
            price_band_high: high,
            ..Default::default()
        }
    }

    fn parse_listings(entries: &[GmpEntry]) -> Vec<RawRecord> {
        entries
            .iter()
            .filter_map(|e| RawRecord::from_fields(SourceName::IpoCentral, OperationKind::Listing, Self::listing_fields(e)))
            .collect()
    }

    fn parse_premiums(entries: &[GmpEntry]) -> Vec<RawRecord> {
        entries
            .iter()
            .filter_map(|e| {
                let gmp = e.gmp.as_ref().and_then(value_as_f64)?;
                let fields = OfferingFields {
                    company_name: non_empty(e.company.as_deref()),
                    gmp: Some(gmp),
                    gmp_percent: e.gmp_percent.as_ref().and_then(value_as_f64),
                    estimated_listing_price: e.expected_listing.as_ref().and_then(value_as_f64),
                    ..Default::default()
                };
                RawRecord::from_fields(SourceName::IpoCentral, OperationKind::PremiumQuote, fields)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for IpoCentralAdapter {
    fn name(&self) -> SourceName {
        SourceName::IpoCentral
    }

    fn supports(&self, kind: OperationKind) -> bool {
        matches!(kind, OperationKind::Listing | OperationKind::PremiumQuote)
    }

    async fn fetch_listings(&self) -> FetchResult {
        fetch_with_retry(SourceName::IpoCentral, OperationKind::Listing, &self.retry, move || async move {
            Ok::<_, FetchError>(Self::parse_listings(&self.fetch_entries().await?))
        })
        .await
    }

    async fn fetch_subscription_levels(&self) -> FetchResult {
        let err = FetchError::Unsupported(SourceName::IpoCentral, OperationKind::SubscriptionLevel);
        FetchResult::failed(SourceName::IpoCentral, OperationKind::SubscriptionLevel, err.to_string(), 0)
    }

    async fn fetch_premium_quotes(&self) -> FetchResult {
        fetch_with_retry(SourceName::IpoCentral, OperationKind::PremiumQuote, &self.retry, move || async move {
            Ok::<_, FetchError>(Self::parse_premiums(&self.fetch_entries().await?))
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
