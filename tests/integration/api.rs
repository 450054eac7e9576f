//! Control API over real components: mock sources, SQLite store, quota.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

use ipo_pulse::api::build_router;
use ipo_pulse::api::routes::ApiState;
use ipo_pulse::config::{HealthConfig, QuotaConfig, StorageConfig};
use ipo_pulse::engine::aggregator::Aggregator;
use ipo_pulse::engine::scheduler::{PollScheduler, SchedulerSettings};
use ipo_pulse::health::{HealthMonitor, MonitoredSource};
use ipo_pulse::quota::{QuotaLedger, API_KEY_HEADER};
use ipo_pulse::storage;
use ipo_pulse::types::SourceName;

use crate::mock_source::MockSource;

async fn app() -> (Router, Arc<MockSource>) {
    let nse = MockSource::new(SourceName::Nse)
        .listing("Alpha Infra Ltd", "ALPHAINF")
        .subscription("Alpha Infra Ltd", 24.0);
    let igain = MockSource::new(SourceName::InvestorGain)
        .subscription("Alpha Infra Ltd", 23.0)
        .premium("Alpha Infra Ltd", 61.0);

    let health = Arc::new(HealthMonitor::new(&HealthConfig::default()));
    let aggregator = Arc::new(Aggregator::new(vec![
        MonitoredSource::wrap(nse.clone(), health.clone()),
        MonitoredSource::wrap(igain.clone(), health.clone()),
    ]));
    let store = storage::open(&StorageConfig { database_url: Some("sqlite::memory:".into()) })
        .await
        .unwrap();
    let settings = SchedulerSettings {
        subscription_sources: vec![SourceName::Nse, SourceName::InvestorGain],
        premium_sources: vec![SourceName::InvestorGain],
        ..SchedulerSettings::default()
    };
    let quota = QuotaLedger::new(&QuotaConfig {
        default_tier: "free".into(),
        tiers: HashMap::from([("free".into(), 2), ("pro".into(), 50)]),
        credentials: HashMap::from([("pro-key".into(), "pro".into())]),
    });

    let state = Arc::new(ApiState {
        scheduler: PollScheduler::new(aggregator.clone(), store.clone(), settings),
        aggregator,
        store,
        health,
        quota: Arc::new(quota),
    });
    (build_router(state), nse)
}

async fn call(app: &Router, method: &str, uri: &str, key: Option<&str>) -> (StatusCode, serde_json::Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(k) = key {
        req = req.header(API_KEY_HEADER, k);
    }
    let resp = app.clone().oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
}

#[tokio::test]
async fn test_trigger_persists_and_latest_reads_back() {
    let (app, _) = app().await;

    let (status, _) = call(&app, "GET", "/api/offerings/ALPHAINFRA/latest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, report) = call(&app, "POST", "/api/poller/trigger", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["cycle_number"], 1);
    assert_eq!(report["subscriptions"], 1);
    assert_eq!(report["premiums"], 1);
    assert_eq!(report["alerts_raised"], 1);

    // Keys are matched case-insensitively.
    let (status, latest) = call(&app, "GET", "/api/offerings/alphainfra/latest", None).await;
    assert_eq!(status, StatusCode::OK);
    let records = latest["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["kind"], "subscription_level");
    assert_eq!(records[0]["fields"]["total"], 24.0);
    assert_eq!(records[0]["confidence"], "high");
    assert_eq!(records[1]["fields"]["gmp"], 61.0);

    let (_, status) = call(&app, "GET", "/api/poller/status", None).await;
    assert_eq!(status["cycle_count"], 1);
    assert_eq!(status["recent_alerts"][0]["severity"], "critical");
}

#[tokio::test]
async fn test_listings_pass_through_quota() {
    let (app, nse) = app().await;

    let (status, body) = call(&app, "GET", "/api/offerings/listings?sources=nse", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["fields"]["symbol"], "ALPHAINF");
    assert_eq!(body["data"][0]["confidence"], "low");

    call(&app, "GET", "/api/offerings/listings?sources=nse", None).await;
    let (status, _) = call(&app, "GET", "/api/offerings/listings?sources=nse", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(nse.calls(), 2);

    // A different credential has its own counter.
    let (status, _) = call(&app, "GET", "/api/offerings/listings?sources=nse", Some("pro-key")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, quota) = call(&app, "GET", "/api/quota", Some("pro-key")).await;
    assert_eq!(quota["tier"], "pro");
    assert_eq!(quota["remaining"], 49);
}

#[tokio::test]
async fn test_source_failures_show_in_health() {
    let (app, nse) = app().await;
    nse.set_error("HTTP 503");

    let (status, body) = call(&app, "GET", "/api/offerings/subscriptions", Some("pro-key")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["successful_sources"], 1);
    assert_eq!(body["data"][0]["confidence"], "medium");

    let (_, sources) = call(&app, "GET", "/api/health/sources", None).await;
    let nse_stats = sources.as_array().unwrap().iter().find(|s| s["source"] == "nse").unwrap();
    assert_eq!(nse_stats["errors"], 1);
    assert_eq!(nse_stats["status"], "down");
    assert_eq!(nse_stats["last_error_message"], "subscription: HTTP 503");
}

#[tokio::test]
async fn test_concurrent_requests_may_overshoot_ceiling() {
    let (app, _) = app().await;

    let requests = (0..5).map(|_| call(&app, "GET", "/api/offerings/listings?sources=nse", None));
    let statuses: Vec<StatusCode> = futures::future::join_all(requests).await.into_iter().map(|(s, _)| s).collect();

    // Check and count are separate steps; concurrent callers can all pass the check.
    let served = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    assert!(served >= 2);
    assert_eq!(served + statuses.iter().filter(|s| **s == StatusCode::TOO_MANY_REQUESTS).count(), 5);

    let (_, quota) = call(&app, "GET", "/api/quota", None).await;
    assert_eq!(quota["allowed"], false);
    assert_eq!(quota["remaining"], 0);
}
