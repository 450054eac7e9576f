//! Mock source for integration testing.
//!
//! A deterministic `SourceAdapter` whose records, failures and latency are
//! controllable from test code. No network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ipo_pulse::sources::SourceAdapter;
use ipo_pulse::types::{FetchResult, OfferingFields, OperationKind, RawRecord, SourceName};

pub struct MockSource {
    name: SourceName,
    records: Mutex<HashMap<OperationKind, Vec<OfferingFields>>>,
    /// If set, every fetch fails with this message.
    force_error: Mutex<Option<String>>,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSource {
    pub fn new(name: SourceName) -> Arc<Self> {
        Arc::new(Self {
            name,
            records: Mutex::new(HashMap::new()),
            force_error: Mutex::new(None),
            latency: Mutex::new(None),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn subscription(self: &Arc<Self>, company: &str, total: f64) -> Arc<Self> {
        self.push(
            OperationKind::SubscriptionLevel,
            OfferingFields { company_name: Some(company.into()), total: Some(total), ..Default::default() },
        );
        Arc::clone(self)
    }

    pub fn premium(self: &Arc<Self>, company: &str, gmp: f64) -> Arc<Self> {
        self.push(
            OperationKind::PremiumQuote,
            OfferingFields { company_name: Some(company.into()), gmp: Some(gmp), ..Default::default() },
        );
        Arc::clone(self)
    }

    pub fn listing(self: &Arc<Self>, company: &str, symbol: &str) -> Arc<Self> {
        self.push(
            OperationKind::Listing,
            OfferingFields {
                company_name: Some(company.into()),
                symbol: Some(symbol.into()),
                ..Default::default()
            },
        );
        Arc::clone(self)
    }

    fn push(&self, kind: OperationKind, fields: OfferingFields) {
        self.records.lock().unwrap().entry(kind).or_default().push(fields);
    }

    /// Replace every record of `kind`.
    pub fn replace(&self, kind: OperationKind, fields: Vec<OfferingFields>) {
        self.records.lock().unwrap().insert(kind, fields);
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn set_latency(&self, d: Duration) {
        *self.latency.lock().unwrap() = Some(d);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of subscription fetches seen running at once.
    pub fn max_concurrent_subscription_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn serve(&self, kind: OperationKind) -> FetchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tracked = kind == OperationKind::SubscriptionLevel;
        if tracked {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        }

        let latency = *self.latency.lock().unwrap();
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }

        if tracked {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        let forced = self.force_error.lock().unwrap().clone();
        if let Some(msg) = forced {
            return FetchResult::failed(self.name, kind, msg, 1);
        }

        let fields = self.records.lock().unwrap().get(&kind).cloned().unwrap_or_default();
        let data = fields
            .into_iter()
            .filter_map(|f| RawRecord::from_fields(self.name, kind, f))
            .collect();
        FetchResult::ok(self.name, kind, data, 1)
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn name(&self) -> SourceName {
        self.name
    }

    fn supports(&self, _kind: OperationKind) -> bool {
        true
    }

    async fn fetch_listings(&self) -> FetchResult {
        self.serve(OperationKind::Listing).await
    }

    async fn fetch_subscription_levels(&self) -> FetchResult {
        self.serve(OperationKind::SubscriptionLevel).await
    }

    async fn fetch_premium_quotes(&self) -> FetchResult {
        self.serve(OperationKind::PremiumQuote).await
    }
}
