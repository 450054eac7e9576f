//! Chittorgarh IPO reports.
//!
//! The broadest single source: publishes listing calendars, category-wise
//! subscription and a grey-market table. Each report is a
//! `reportTableData` array whose column captions drift over time, so rows
//! are read by column-name prefix.
//!
//! Reports: `/api/reports/ipo-list`, `/api/reports/ipo-subscription`,
//! `/api/reports/ipo-gmp`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{
    cell_num, cell_text, fetch_with_retry, parse_price_band, FetchError, ReportTable,
    RetryPolicy, SourceAdapter, SourceHttp,
};
use crate::config::SourceConfig;
use crate::types::{FetchResult, OfferingFields, OperationKind, RawRecord, SourceName};

const NAME_COLUMNS: &[&str] = &["company name", "company", "ipo name", "ipo"];

type Row = HashMap<String, serde_json::Value>;

pub struct ChittorgarhAdapter {
    http: SourceHttp,
    retry: RetryPolicy,
}

impl ChittorgarhAdapter {
    pub fn new(cfg: &SourceConfig) -> Result<Self> {
        Ok(Self {
            http: SourceHttp::new(&cfg.base_url, Duration::from_secs(cfg.timeout_secs))?,
            retry: RetryPolicy::from_config(cfg),
        })
    }

    async fn fetch_report(&self, report: &str) -> Result<ReportTable, FetchError> {
        let table: ReportTable = self.http.get_json(&format!("/api/reports/{report}"), &[]).await?;
        debug!(report, rows = table.rows.len(), "Chittorgarh report fetched");
        Ok(table)
    }

    fn listing_fields(row: &Row) -> OfferingFields {
        let (low, high) = cell_text(row, &["issue price", "price band"])
            .map(|s| parse_price_band(&s))
            .unwrap_or((None, None));
        OfferingFields {
            company_name: cell_text(row, NAME_COLUMNS),
            board: cell_text(row, &["board", "exchange"]).map(|b| {
                if b.to_lowercase().contains("sme") { "sme".to_string() } else { "mainboard".to_string() }
            }),
            open_date: cell_text(row, &["opening date", "open date", "open"]),
            close_date: cell_text(row, &["closing date", "close date", "close"]),
            listing_date: cell_text(row, &["listing date", "listing"]),
            price_band_low: low,
            price_band_high: high,
            lot_size: cell_num(row, &["lot size", "market lot"]).map(|v| v as u32),
            issue_size_cr: cell_num(row, &["issue size", "total issue amount"]),
            ..Default::default()
        }
    }

    fn subscription_fields(row: &Row) -> OfferingFields {
        OfferingFields {
            company_name: cell_text(row, NAME_COLUMNS),
            qib: cell_num(row, &["qib"]),
            nii: cell_num(row, &["nii", "hni"]),
            retail: cell_num(row, &["retail", "rii"]),
            employee: cell_num(row, &["employee", "emp"]),
            total: cell_num(row, &["total"]),
            ..Default::default()
        }
    }

    fn premium_fields(row: &Row) -> OfferingFields {
        OfferingFields {
            company_name: cell_text(row, NAME_COLUMNS),
            gmp: cell_num(row, &["gmp (rs.)", "gmp(rs.)", "gmp"]),
            gmp_percent: cell_num(row, &["gmp %", "gain"]),
            estimated_listing_price: cell_num(row, &["est. listing", "estimated listing", "expected listing"]),
            kostak: cell_num(row, &["kostak"]),
            subject_to_sauda: cell_num(row, &["subject to sauda", "sauda"]),
            ..Default::default()
        }
    }

    fn parse(kind: OperationKind, table: &ReportTable) -> Vec<RawRecord> {
        table
            .rows
            .iter()
            .filter_map(|row| {
                let fields = match kind {
                    OperationKind::Listing => Self::listing_fields(row),
                    OperationKind::SubscriptionLevel => Self::subscription_fields(row),
                    OperationKind::PremiumQuote => Self::premium_fields(row),
                };
                // A subscription/premium row without its headline number is noise.
                let has_value = match kind {
                    OperationKind::Listing => true,
                    OperationKind::SubscriptionLevel => fields.total.is_some(),
                    OperationKind::PremiumQuote => fields.gmp.is_some(),
                };
                if !has_value {
                    return None;
                }
                RawRecord::from_fields(SourceName::Chittorgarh, kind, fields)
            })
            .collect()
    }

    async fn run(&self, kind: OperationKind, report: &'static str) -> FetchResult {
        fetch_with_retry(SourceName::Chittorgarh, kind, &self.retry, move || async move {
            let table = self.fetch_report(report).await?;
            Ok::<_, FetchError>(Self::parse(kind, &table))
        })
        .await
    }
}

#[async_trait]
impl SourceAdapter for ChittorgarhAdapter {
    fn name(&self) -> SourceName {
        SourceName::Chittorgarh
    }

    fn supports(&self, _kind: OperationKind) -> bool {
        true
    }

    async fn fetch_listings(&self) -> FetchResult {
        self.run(OperationKind::Listing, "ipo-list").await
    }

    async fn fetch_subscription_levels(&self) -> FetchResult {
        self.run(OperationKind::SubscriptionLevel, "ipo-subscription").await
    }

    async fn fetch_premium_quotes(&self) -> FetchResult {
        self.run(OperationKind::PremiumQuote, "ipo-gmp").await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn table(v: serde_json::Value) -> ReportTable {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_parse_listing_report() {
        let t = table(serde_json::json!({
            "reportTableData": [{
                "Company": "<a href=\"/ipo/alpha\">Alpha Infra Ltd. IPO</a>",
                "Opening Date": "Oct 13, 2026",
                "Closing Date": "Oct 15, 2026",
                "Listing Date": "Oct 20, 2026",
                "Issue Price (Rs.)": "95.00 to 100.00",
                "Issue Size (Rs Cr.)": "1,250.50",
                "Lot Size": "150",
                "Exchange": "NSE SME"
            }]
        }));
        let recs = ChittorgarhAdapter::parse(OperationKind::Listing, &t);
        assert_eq!(recs.len(), 1);
        let f = &recs[0].fields;
        assert_eq!(recs[0].key, "ALPHAINFRA");
        assert_eq!(f.company_name.as_deref(), Some("Alpha Infra Ltd. IPO"));
        assert_eq!(f.price_band_high, Some(100.0));
        assert_eq!(f.issue_size_cr, Some(1250.5));
        assert_eq!(f.lot_size, Some(150));
        assert_eq!(f.board.as_deref(), Some("sme"));
        assert_eq!(f.listing_date.as_deref(), Some("Oct 20, 2026"));
    }

    #[test]
    fn test_parse_subscription_report() {
        let t = table(serde_json::json!({
            "reportTableData": [
                {"Company Name": "Alpha Infra Ltd", "QIB (x)": "30.1", "NII (x)": "12.4",
                 "Retail (x)": "5.5", "Employee (x)": "-", "Total (x)": "14.2"},
                {"Company Name": "Pending Ltd", "Total (x)": ""}
            ]
        }));
        let recs = ChittorgarhAdapter::parse(OperationKind::SubscriptionLevel, &t);
        assert_eq!(recs.len(), 1);
        let f = &recs[0].fields;
        assert_eq!(f.total, Some(14.2));
        assert_eq!(f.qib, Some(30.1));
        assert_eq!(f.employee, None);
    }

    #[test]
    fn test_parse_gmp_report() {
        let t = table(serde_json::json!({
            "reportTableData": [
                {"IPO": "Alpha Infra", "GMP (Rs.)": "₹45", "Est. Listing": "₹145 (45%)",
                 "Kostak": "500", "Subject to Sauda": "3,000"}
            ]
        }));
        let recs = ChittorgarhAdapter::parse(OperationKind::PremiumQuote, &t);
        assert_eq!(recs.len(), 1);
        let f = &recs[0].fields;
        assert_eq!(f.gmp, Some(45.0));
        assert_eq!(f.estimated_listing_price, Some(145.0));
        assert_eq!(f.subject_to_sauda, Some(3000.0));
    }

    #[test]
    fn test_empty_report() {
        let t = table(serde_json::json!({}));
        assert!(ChittorgarhAdapter::parse(OperationKind::Listing, &t).is_empty());
    }
}
