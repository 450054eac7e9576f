//! InvestorGain live grey-market report.
//!
//! One report carries both the grey-market premium and the headline
//! subscription multiple for every open issue, so it serves two
//! operations from the same payload. Names arrive wrapped in anchor tags
//! and suffixed with the board ("Alpha Infra NSE SME").
//!
//! Report: `/api/report/gmp?category=all`

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use super::{
    cell_num, cell_text, fetch_with_retry, FetchError, ReportTable, RetryPolicy, SourceAdapter,
    SourceHttp,
};
use crate::config::SourceConfig;
use crate::types::{FetchResult, OfferingFields, OperationKind, RawRecord, SourceName};

type Row = HashMap<String, serde_json::Value>;

pub struct InvestorGainAdapter {
    http: SourceHttp,
    retry: RetryPolicy,
}

impl InvestorGainAdapter {
    pub fn new(cfg: &SourceConfig) -> Result<Self> {
        Ok(Self {
            http: SourceHttp::new(&cfg.base_url, Duration::from_secs(cfg.timeout_secs))?,
            retry: RetryPolicy::from_config(cfg),
        })
    }

    async fn fetch_report(&self) -> Result<ReportTable, FetchError> {
        self.http.get_json("/api/report/gmp?category=all", &[]).await
    }

    fn base_fields(row: &Row) -> OfferingFields {
        let name = cell_text(row, &["name", "ipo"]);
        let board = name.as_deref().map(|n| {
            if n.to_uppercase().ends_with("SME") { "sme".to_string() } else { "mainboard".to_string() }
        });
        OfferingFields {
            company_name: name,
            board,
            ..Default::default()
        }
    }

    fn parse_premiums(table: &ReportTable) -> Vec<RawRecord> {
        table
            .rows
            .iter()
            .filter_map(|row| {
                let gmp = cell_num(row, &["gmp(₹)", "gmp (₹)", "gmp"])?;
                let fields = OfferingFields {
                    gmp: Some(gmp),
                    estimated_listing_price: cell_num(row, &["est listing", "est. listing"]),
                    gmp_percent: Self::listing_gain_pct(row),
                    kostak: cell_num(row, &["kostak"]),
                    subject_to_sauda: cell_num(row, &["sauda", "subject to sauda"]),
                    ..Self::base_fields(row)
                };
                RawRecord::from_fields(SourceName::InvestorGain, OperationKind::PremiumQuote, fields)
            })
            .collect()
    }

    fn parse_subscriptions(table: &ReportTable) -> Vec<RawRecord> {
        table
            .rows
            .iter()
            .filter_map(|row| {
                let total = cell_num(row, &["sub", "subscription"])?;
                let fields = OfferingFields {
                    total: Some(total),
                    ..Self::base_fields(row)
                };
                RawRecord::from_fields(SourceName::InvestorGain, OperationKind::SubscriptionLevel, fields)
            })
            .collect()
    }

    /// "Est Listing" reads "₹245 (22.5%)"; the percentage is the expected gain.
    fn listing_gain_pct(row: &Row) -> Option<f64> {
        let text = cell_text(row, &["est listing", "est. listing"])?;
        let open = text.find('(')?;
        super::parse_number(&text[open + 1..])
    }
}

#[async_trait]
impl SourceAdapter for InvestorGainAdapter {
    fn name(&self) -> SourceName {
        SourceName::InvestorGain
    }

    fn supports(&self, kind: OperationKind) -> bool {
        matches!(kind, OperationKind::SubscriptionLevel | OperationKind::PremiumQuote)
    }

    async fn fetch_listings(&self) -> FetchResult {
        let err = FetchError::Unsupported(SourceName::InvestorGain, OperationKind::Listing);
        FetchResult::failed(SourceName::InvestorGain, OperationKind::Listing, err.to_string(), 0)
    }

    async fn fetch_subscription_levels(&self) -> FetchResult {
        fetch_with_retry(SourceName::InvestorGain, OperationKind::SubscriptionLevel, &self.retry, move || async move {
            Ok::<_, FetchError>(Self::parse_subscriptions(&self.fetch_report().await?))
        })
        .await
    }

    async fn fetch_premium_quotes(&self) -> FetchResult {
        fetch_with_retry(SourceName::InvestorGain, OperationKind::PremiumQuote, &self.retry, move || async move {
            Ok::<_, FetchError>(Self::parse_premiums(&self.fetch_report().await?))
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> ReportTable {
        serde_json::from_value(serde_json::json!({
            "reportTableData": [
                {
                    "Name": "<a href=\"/gmp/alpha-infra-ipo/1\">Alpha Infra</a>",
                    "GMP(₹)": "₹45",
                    "Est Listing": "₹145 (45.00%)",
                    "Sub": "14.2x",
                    "Kostak": "₹500",
                    "Sauda": "-"
                },
                {
                    "Name": "Beta Foods NSE SME",
                    "GMP(₹)": "₹0",
                    "Sub": "-"
                },
                {
                    "Name": "Upcoming Co",
                    "GMP(₹)": "-"
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_premiums() {
        let recs = InvestorGainAdapter::parse_premiums(&report());
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].key, "ALPHAINFRA");
        assert_eq!(recs[0].fields.gmp, Some(45.0));
        assert_eq!(recs[0].fields.gmp_percent, Some(45.0));
        assert_eq!(recs[0].fields.kostak, Some(500.0));
        assert_eq!(recs[0].fields.subject_to_sauda, None);
        assert_eq!(recs[1].key, "BETAFOODS");
        assert_eq!(recs[1].fields.board.as_deref(), Some("sme"));
        assert_eq!(recs[1].fields.gmp, Some(0.0));
    }

    #[test]
    fn test_parse_subscriptions_skips_blank_sub() {
        let recs = InvestorGainAdapter::parse_subscriptions(&report());
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].fields.total, Some(14.2));
    }

    #[tokio::test]
    async fn test_listings_unsupported() {
        let adapter = InvestorGainAdapter::new(&SourceConfig::with_base_url("http://127.0.0.1:9")).unwrap();
        assert!(!adapter.supports(OperationKind::Listing));
        assert!(!adapter.fetch_listings().await.success);
    }
}
