//! Multi-source reconciliation.
//!
//! Fans one operation out to every requested source concurrently, waits for
//! all of them to settle, then folds the raw records into one
//! [`ReconciledRecord`] per normalized key. A failing or panicking source
//! never aborts the others; the pass reports it in `per_source_outcomes`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::sources::SourceAdapter;
use crate::types::{
    Confidence, FetchResult, OperationKind, ReconciledRecord, SourceName, TrackerError, Trend,
};

// ---------------------------------------------------------------------------
// Pass envelope
// ---------------------------------------------------------------------------

/// How one requested source fared in a pass.
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: SourceName,
    pub success: bool,
    pub records: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&FetchResult> for SourceOutcome {
    fn from(r: &FetchResult) -> Self {
        Self {
            source: r.source,
            success: r.success,
            records: r.data.len(),
            elapsed_ms: r.elapsed_ms,
            error: r.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    pub kind: OperationKind,
    pub data: Vec<ReconciledRecord>,
    pub per_source_outcomes: Vec<SourceOutcome>,
    pub total_sources_queried: usize,
    pub successful_sources: usize,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

pub struct Aggregator {
    adapters: HashMap<SourceName, Arc<dyn SourceAdapter>>,
}

impl Aggregator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        let adapters = adapters.into_iter().map(|a| (a.name(), a)).collect();
        Self { adapters }
    }

    /// Registered sources, in declaration order.
    pub fn sources(&self) -> Vec<SourceName> {
        SourceName::ALL
            .iter()
            .copied()
            .filter(|s| self.adapters.contains_key(s))
            .collect()
    }

    pub async fn aggregate_listings(&self, sources: &[SourceName]) -> Result<AggregateResult, TrackerError> {
        self.aggregate(OperationKind::Listing, sources).await
    }

    pub async fn aggregate_subscriptions(&self, sources: &[SourceName]) -> Result<AggregateResult, TrackerError> {
        self.aggregate(OperationKind::SubscriptionLevel, sources).await
    }

    pub async fn aggregate_premiums(&self, sources: &[SourceName]) -> Result<AggregateResult, TrackerError> {
        self.aggregate(OperationKind::PremiumQuote, sources).await
    }

    /// Run one reconciliation pass for `kind` over `sources`.
    ///
    /// Names without a registered adapter, or whose adapter does not
    /// publish `kind`, fail without a network call. If every name fails
    /// that way the pass is a configuration error.
    pub async fn aggregate(
        &self,
        kind: OperationKind,
        sources: &[SourceName],
    ) -> Result<AggregateResult, TrackerError> {
        let mut requested: Vec<SourceName> = Vec::with_capacity(sources.len());
        for s in sources {
            if !requested.contains(s) {
                requested.push(*s);
            }
        }
        if requested.is_empty() {
            return Err(TrackerError::Config(format!("no sources requested for {kind}")));
        }

        // Slot per requested source so the reduce runs in request order.
        let mut slots: Vec<Option<FetchResult>> = vec![None; requested.len()];
        let mut set = JoinSet::new();

        for (idx, source) in requested.iter().enumerate() {
            match self.adapters.get(source) {
                Some(adapter) if adapter.supports(kind) => {
                    let adapter = Arc::clone(adapter);
                    set.spawn(async move { (idx, adapter.fetch(kind).await) });
                }
                Some(_) => {
                    slots[idx] = Some(FetchResult::failed(*source, kind, format!("{source} does not publish {kind} data"), 0));
                }
                None => {
                    slots[idx] = Some(FetchResult::failed(*source, kind, format!("no adapter registered for {source}"), 0));
                }
            }
        }

        if set.is_empty() {
            warn!(%kind, requested = requested.len(), "No requested source can serve this operation");
            return Err(TrackerError::Config(format!(
                "none of the requested sources can serve {kind}"
            )));
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!(%kind, error = %e, "Source task did not complete"),
            }
        }

        let results: Vec<FetchResult> = slots
            .into_iter()
            .zip(requested.iter())
            .map(|(slot, source)| {
                slot.unwrap_or_else(|| FetchResult::failed(*source, kind, "source task panicked", 0))
            })
            .collect();

        let total = requested.len();
        let successful = results.iter().filter(|r| r.success).count();
        let data = reconcile(kind, &results, total);

        info!(
            %kind,
            queried = total,
            successful,
            records = data.len(),
            "Reconciliation pass complete"
        );

        Ok(AggregateResult {
            kind,
            data,
            per_source_outcomes: results.iter().map(SourceOutcome::from).collect(),
            total_sources_queried: total,
            successful_sources: successful,
            timestamp: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Reduce
// ---------------------------------------------------------------------------

/// Fold settled fetch results (in request order) into reconciled records.
///
/// First-seen values win field by field. Attribution lists each
/// contributing source once. Output keeps first-seen key order.
pub fn reconcile(kind: OperationKind, results: &[FetchResult], total_sources_queried: usize) -> Vec<ReconciledRecord> {
    let mut out: Vec<ReconciledRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    // key -> (first premium, last-seen premium)
    let mut premiums: HashMap<String, (f64, f64)> = HashMap::new();
    let now = Utc::now();

    for result in results.iter().filter(|r| r.success) {
        for raw in &result.data {
            match index.get(&raw.key) {
                Some(&i) => {
                    let rec = &mut out[i];
                    rec.fields.merge_from(&raw.fields);
                    if !rec.attribution.contains(&raw.source) {
                        rec.attribution.push(raw.source);
                    }
                }
                None => {
                    index.insert(raw.key.clone(), out.len());
                    out.push(ReconciledRecord {
                        key: raw.key.clone(),
                        kind,
                        fields: raw.fields.clone(),
                        attribution: vec![raw.source],
                        confidence: Confidence::Low,
                        last_updated: now,
                        trend: None,
                    });
                }
            }

            if kind == OperationKind::PremiumQuote {
                if let Some(gmp) = raw.fields.gmp {
                    premiums
                        .entry(raw.key.clone())
                        .and_modify(|(_, last)| *last = gmp)
                        .or_insert((gmp, gmp));
                }
            }
        }
    }

    for rec in &mut out {
        rec.confidence = Confidence::assess(rec.attribution.len(), total_sources_queried);
        if let Some((first, last)) = premiums.get(&rec.key) {
            rec.trend = Some(Trend::classify(*first, *last));
        }
        debug!(key = %rec.key, confidence = %rec.confidence, sources = rec.attribution.len(), "Record reconciled");
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
