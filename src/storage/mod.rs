//! Persistence layer.
//!
//! The scheduler talks to storage only through [`OfferingStore`]: upsert
//! the latest reconciled record, append a time-series point, read the
//! latest records for a key. Two backends: [`MemoryStore`] for tests and
//! store-less runs, [`sqlite::SqliteStore`] when a database URL is set.
//!
//! Previous-value baselines are saved separately as a JSON snapshot
//! (see [`snapshot`]).

pub mod snapshot;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::StorageConfig;
use crate::types::{OperationKind, ReconciledRecord, TrackerError};

/// Series name for subscription totals.
pub const SERIES_SUBSCRIPTION_TOTAL: &str = "subscription_total";
/// Series name for grey-market premiums.
pub const SERIES_GMP: &str = "gmp";

/// One time-series observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OfferingStore: Send + Sync {
    /// Insert or replace the latest record for `(record.key, record.kind)`.
    async fn upsert_by_symbol(&self, record: &ReconciledRecord) -> Result<(), TrackerError>;

    async fn append_time_series(
        &self,
        key: &str,
        series: &str,
        value: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), TrackerError>;

    /// Latest record of each kind stored for `key`, in kind order.
    /// Empty when the key has never been stored.
    async fn read_latest_by_key(&self, key: &str) -> Result<Vec<ReconciledRecord>, TrackerError>;
}

/// Pick a backend from config. Falls back to memory when no URL is set.
pub async fn open(cfg: &StorageConfig) -> anyhow::Result<Arc<dyn OfferingStore>> {
    match cfg.database_url.as_deref() {
        Some(url) => {
            let store = sqlite::SqliteStore::connect(url).await?;
            info!(url, "SQLite store ready");
            Ok(Arc::new(store))
        }
        None => {
            info!("No database configured, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub(crate) fn kind_rank(kind: OperationKind) -> u8 {
    match kind {
        OperationKind::Listing => 0,
        OperationKind::SubscriptionLevel => 1,
        OperationKind::PremiumQuote => 2,
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    latest: RwLock<HashMap<(String, u8), ReconciledRecord>>,
    series: RwLock<HashMap<(String, String), Vec<SeriesPoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every point recorded for `key`/`series`, oldest first.
    pub async fn series(&self, key: &str, series: &str) -> Vec<SeriesPoint> {
        self.series
            .read()
            .await
            .get(&(key.to_string(), series.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.latest.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.latest.read().await.is_empty()
    }
}

#[async_trait]
impl OfferingStore for MemoryStore {
    async fn upsert_by_symbol(&self, record: &ReconciledRecord) -> Result<(), TrackerError> {
        self.latest
            .write()
            .await
            .insert((record.key.clone(), kind_rank(record.kind)), record.clone());
        Ok(())
    }

    async fn append_time_series(
        &self,
        key: &str,
        series: &str,
        value: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        self.series
            .write()
            .await
            .entry((key.to_string(), series.to_string()))
            .or_default()
            .push(SeriesPoint { value, recorded_at });
        Ok(())
    }

    async fn read_latest_by_key(&self, key: &str) -> Result<Vec<ReconciledRecord>, TrackerError> {
        let latest = self.latest.read().await;
        let mut out: Vec<ReconciledRecord> = latest
            .iter()
            .filter(|((k, _), _)| k == key)
            .map(|(_, r)| r.clone())
            .collect();
        out.sort_by_key(|r| kind_rank(r.kind));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Confidence, OfferingFields, SourceName};
    use tokio_test::assert_ok;

    fn record(key: &str, kind: OperationKind, total: f64) -> ReconciledRecord {
        ReconciledRecord {
            key: key.to_string(),
            kind,
            fields: OfferingFields { total: Some(total), ..Default::default() },
            attribution: vec![SourceName::Nse],
            confidence: Confidence::Low,
            last_updated: Utc::now(),
            trend: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_kind() {
        let store = MemoryStore::new();
        assert_ok!(store.upsert_by_symbol(&record("ALPHA", OperationKind::SubscriptionLevel, 2.0)).await);
        assert_ok!(store.upsert_by_symbol(&record("ALPHA", OperationKind::SubscriptionLevel, 5.0)).await);
        assert_ok!(store.upsert_by_symbol(&record("ALPHA", OperationKind::Listing, 0.0)).await);

        let latest = store.read_latest_by_key("ALPHA").await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].kind, OperationKind::Listing);
        assert_eq!(latest[1].fields.total, Some(5.0));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_key_is_empty() {
        let store = MemoryStore::new();
        assert!(store.read_latest_by_key("NOPE").await.unwrap().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_series_appends_in_order() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        assert_ok!(store.append_time_series("ALPHA", SERIES_GMP, 40.0, t0).await);
        assert_ok!(store.append_time_series("ALPHA", SERIES_GMP, 45.0, t0 + chrono::Duration::minutes(5)).await);
        let pts = store.series("ALPHA", SERIES_GMP).await;
        assert_eq!(pts.iter().map(|p| p.value).collect::<Vec<_>>(), vec![40.0, 45.0]);
        assert!(store.series("ALPHA", SERIES_SUBSCRIPTION_TOTAL).await.is_empty());
    }

    #[tokio::test]
    async fn test_open_without_url_is_memory() {
        let store = open(&StorageConfig::default()).await.unwrap();
        assert!(store.read_latest_by_key("X").await.unwrap().is_empty());
    }
}
