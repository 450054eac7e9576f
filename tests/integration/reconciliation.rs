//! Multi-source reconciliation through the public aggregator API.

use std::sync::Arc;

use ipo_pulse::engine::aggregator::Aggregator;
use ipo_pulse::sources::SourceAdapter;
use ipo_pulse::types::{Confidence, SourceName, TrackerError, Trend};

use crate::mock_source::MockSource;

const X: SourceName = SourceName::Nse;
const Y: SourceName = SourceName::Chittorgarh;
const Z: SourceName = SourceName::InvestorGain;

fn aggregator(sources: &[Arc<MockSource>]) -> Aggregator {
    Aggregator::new(sources.iter().map(|s| Arc::clone(s) as Arc<dyn SourceAdapter>).collect())
}

#[tokio::test]
async fn test_three_sources_two_corroborate() {
    let x = MockSource::new(X).subscription("Alpha Infra Ltd", 12.0);
    let y = MockSource::new(Y).subscription("ALPHA INFRA LIMITED", 11.0);
    let z = MockSource::new(Z).subscription("Zeta Foods", 3.0);
    let agg = aggregator(&[x, y, z]);

    let result = agg.aggregate_subscriptions(&[X, Y, Z]).await.unwrap();
    assert_eq!(result.total_sources_queried, 3);
    assert_eq!(result.successful_sources, 3);
    assert_eq!(result.data.len(), 2);

    let alpha = result.data.iter().find(|r| r.key == "ALPHAINFRA").unwrap();
    assert_eq!(alpha.fields.total, Some(12.0));
    assert_eq!(alpha.attribution, vec![X, Y]);
    assert_eq!(alpha.confidence, Confidence::High);

    // A lone source out of three queried is medium under the attribution rule.
    let zeta = result.data.iter().find(|r| r.key == "ZETAFOODS").unwrap();
    assert_eq!(zeta.attribution, vec![Z]);
    assert_eq!(zeta.confidence, Confidence::Medium);
}

#[tokio::test]
async fn test_failing_source_does_not_abort_pass() {
    let x = MockSource::new(X).subscription("Alpha Infra Ltd", 12.0);
    let y = MockSource::new(Y).subscription("Alpha Infra Ltd", 11.0);
    y.set_error("HTTP 503");
    let agg = aggregator(&[x, y.clone()]);

    let result = agg.aggregate_subscriptions(&[X, Y]).await.unwrap();
    assert_eq!(result.successful_sources, 1);
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].confidence, Confidence::Medium);

    let failed = result.per_source_outcomes.iter().find(|o| o.source == Y).unwrap();
    assert!(!failed.success);
    assert_eq!(failed.error.as_deref(), Some("HTTP 503"));

    y.clear_error();
    let result = agg.aggregate_subscriptions(&[X, Y]).await.unwrap();
    assert_eq!(result.data[0].confidence, Confidence::High);
}

#[tokio::test]
async fn test_every_source_failing_is_still_a_result() {
    let x = MockSource::new(X).subscription("Alpha", 1.0);
    x.set_error("timeout");
    let agg = aggregator(&[x]);

    let result = agg.aggregate_subscriptions(&[X]).await.unwrap();
    assert_eq!(result.successful_sources, 0);
    assert!(result.data.is_empty());
    assert_eq!(result.per_source_outcomes.len(), 1);
}

#[tokio::test]
async fn test_single_source_queried_is_low() {
    let x = MockSource::new(X).listing("Alpha Infra Ltd", "ALPHAINF");
    let agg = aggregator(&[x]);

    let result = agg.aggregate_listings(&[X]).await.unwrap();
    assert_eq!(result.data[0].confidence, Confidence::Low);
    assert_eq!(result.data[0].fields.symbol.as_deref(), Some("ALPHAINF"));
}

#[tokio::test]
async fn test_premium_trend_across_sources() {
    let x = MockSource::new(X).premium("Alpha Infra", 40.0).premium("Beta Power", 100.0);
    let y = MockSource::new(Y).premium("Alpha Infra", 52.0).premium("Beta Power", 97.0);
    let z = MockSource::new(Z).premium("Gamma Labs", 10.0);
    let agg = aggregator(&[x, y, z]);

    let result = agg.aggregate_premiums(&[X, Y, Z]).await.unwrap();
    let trend = |key: &str| result.data.iter().find(|r| r.key == key).and_then(|r| r.trend);

    assert_eq!(trend("ALPHAINFRA"), Some(Trend::Rising));
    assert_eq!(trend("BETAPOWER"), Some(Trend::Stable));
    assert_eq!(trend("GAMMALABS"), Some(Trend::Stable));

    let alpha = result.data.iter().find(|r| r.key == "ALPHAINFRA").unwrap();
    assert_eq!(alpha.fields.gmp, Some(40.0));
}

#[tokio::test]
async fn test_duplicate_requested_names_query_once() {
    let x = MockSource::new(X).subscription("Alpha", 2.0);
    let agg = aggregator(&[x.clone()]);

    let result = agg.aggregate_subscriptions(&[X, X, X]).await.unwrap();
    assert_eq!(result.total_sources_queried, 1);
    assert_eq!(x.calls(), 1);
}

#[tokio::test]
async fn test_unregistered_sources_are_a_config_error() {
    let agg = aggregator(&[MockSource::new(X)]);

    let err = agg.aggregate_subscriptions(&[SourceName::IpoCentral]).await.unwrap_err();
    assert!(matches!(err, TrackerError::Config(_)));

    let err = agg.aggregate_subscriptions(&[]).await.unwrap_err();
    assert!(matches!(err, TrackerError::Config(_)));

    // One servable name is enough; the other is reported as failed.
    let result = agg.aggregate_subscriptions(&[X, SourceName::IpoCentral]).await.unwrap();
    assert_eq!(result.total_sources_queried, 2);
    assert_eq!(result.successful_sources, 1);
}
