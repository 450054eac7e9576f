//! Poll scheduler lifecycle, alerting and persistence end to end.

use std::sync::Arc;
use std::time::Duration;

use ipo_pulse::engine::aggregator::Aggregator;
use ipo_pulse::engine::scheduler::{PollScheduler, SchedulerSettings};
use ipo_pulse::sources::SourceAdapter;
use ipo_pulse::storage::snapshot::{load_baseline, save_baseline};
use ipo_pulse::storage::{MemoryStore, OfferingStore, SERIES_GMP, SERIES_SUBSCRIPTION_TOTAL};
use ipo_pulse::types::{AlertSeverity, AlertType, OfferingFields, OperationKind, SourceName};

use crate::mock_source::MockSource;

const X: SourceName = SourceName::Nse;
const Y: SourceName = SourceName::Chittorgarh;

struct Harness {
    scheduler: PollScheduler,
    store: Arc<MemoryStore>,
    x: Arc<MockSource>,
    y: Arc<MockSource>,
}

fn harness(alert_buffer_cap: usize) -> Harness {
    let x = MockSource::new(X).subscription("Alpha Infra Ltd", 8.0).premium("Alpha Infra Ltd", 50.0);
    let y = MockSource::new(Y).subscription("Alpha Infra Ltd", 7.5);
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![x.clone(), y.clone()];
    let aggregator = Arc::new(Aggregator::new(adapters));
    let store = Arc::new(MemoryStore::new());
    let settings = SchedulerSettings {
        subscription_sources: vec![X, Y],
        premium_sources: vec![X],
        alert_buffer_cap,
        ..SchedulerSettings::default()
    };
    let scheduler = PollScheduler::new(aggregator, store.clone() as Arc<dyn OfferingStore>, settings);
    Harness { scheduler, store, x, y }
}

fn sub(company: &str, total: f64) -> OfferingFields {
    OfferingFields { company_name: Some(company.into()), total: Some(total), ..Default::default() }
}

fn prem(company: &str, gmp: f64) -> OfferingFields {
    OfferingFields { company_name: Some(company.into()), gmp: Some(gmp), ..Default::default() }
}

#[tokio::test]
async fn test_two_cycles_raise_delta_alerts_and_persist() {
    let h = harness(100);

    let first = h.scheduler.trigger_manual_poll().await.unwrap();
    assert_eq!(first.cycle_number, 1);
    assert_eq!(first.alerts_raised, 0);
    assert_eq!(first.persistence_failures, 0);

    h.x.replace(OperationKind::SubscriptionLevel, vec![sub("Alpha Infra Ltd", 21.0)]);
    h.x.replace(OperationKind::PremiumQuote, vec![prem("Alpha Infra Ltd", 40.0)]);

    let second = h.scheduler.trigger_manual_poll().await.unwrap();
    assert_eq!(second.cycle_number, 2);

    let alerts = h.scheduler.recent_alerts(10).await;
    let kinds: Vec<(AlertType, AlertSeverity)> = alerts.iter().map(|a| (a.alert_type, a.severity)).collect();
    assert!(kinds.contains(&(AlertType::Threshold, AlertSeverity::Critical)));
    assert!(kinds.contains(&(AlertType::Momentum, AlertSeverity::Warning)));
    assert!(kinds.contains(&(AlertType::PremiumDrop, AlertSeverity::Warning)));
    assert_eq!(alerts.len(), second.alerts_raised);

    let latest = h.store.read_latest_by_key("ALPHAINFRA").await.unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].kind, OperationKind::SubscriptionLevel);
    assert_eq!(latest[0].fields.total, Some(21.0));

    let totals: Vec<f64> = h.store.series("ALPHAINFRA", SERIES_SUBSCRIPTION_TOTAL).await.iter().map(|p| p.value).collect();
    assert_eq!(totals, vec![8.0, 21.0]);
    assert_eq!(h.store.series("ALPHAINFRA", SERIES_GMP).await.len(), 2);
}

#[tokio::test]
async fn test_previous_values_survive_a_vanished_key() {
    let h = harness(100);
    h.scheduler.trigger_manual_poll().await.unwrap();

    h.x.replace(OperationKind::SubscriptionLevel, Vec::new());
    h.y.replace(OperationKind::SubscriptionLevel, Vec::new());
    h.scheduler.trigger_manual_poll().await.unwrap();

    let baseline = h.scheduler.baseline().await;
    assert_eq!(baseline.previous_totals.get("ALPHAINFRA"), Some(&8.0));
    assert_eq!(baseline.cycle_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_start_and_stop_twice() {
    let h = harness(100);

    assert!(h.scheduler.start().await);
    assert!(!h.scheduler.start().await);
    assert!(h.scheduler.is_running().await);

    // Arming runs one cycle straight away.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.scheduler.status().await.cycle_count, 1);

    assert!(h.scheduler.stop().await);
    assert!(!h.scheduler.stop().await);
    assert!(!h.scheduler.status().await.running);

    // Stopped: no further cycles even after a long wait.
    tokio::time::sleep(Duration::from_secs(4 * 3600)).await;
    assert_eq!(h.scheduler.status().await.cycle_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_triggers_are_serialized() {
    let h = harness(100);
    h.x.set_latency(Duration::from_millis(200));

    let a = h.scheduler.clone();
    let b = h.scheduler.clone();
    let (ra, rb) = tokio::join!(a.trigger_manual_poll(), b.trigger_manual_poll());

    let mut cycles = vec![ra.unwrap().cycle_number, rb.unwrap().cycle_number];
    cycles.sort_unstable();
    assert_eq!(cycles, vec![1, 2]);
    assert_eq!(h.x.max_concurrent_subscription_fetches(), 1);
}

#[tokio::test]
async fn test_alert_buffer_is_bounded() {
    let h = harness(3);
    h.x.replace(
        OperationKind::SubscriptionLevel,
        (0..5).map(|i| sub(&format!("Hot Issue {i}"), 30.0)).collect(),
    );

    let report = h.scheduler.trigger_manual_poll().await.unwrap();
    assert_eq!(report.alerts_raised, 5);

    let status = h.scheduler.status().await;
    assert_eq!(status.recent_alerts.len(), 3);
    // Newest first: the last record's alert leads.
    assert!(status.recent_alerts[0].key.ends_with('4'));

    assert_eq!(h.scheduler.clear_alerts().await, 3);
    assert!(h.scheduler.recent_alerts(10).await.is_empty());
}

#[tokio::test]
async fn test_baseline_snapshot_round_trip_restores_deltas() {
    let path = std::env::temp_dir().join(format!("ipo_pulse_baseline_{}.json", uuid::Uuid::new_v4()));
    let path = path.to_string_lossy().to_string();

    let first = harness(100);
    first.scheduler.trigger_manual_poll().await.unwrap();
    save_baseline(&first.scheduler.baseline().await, &path).unwrap();

    let second = harness(100);
    let restored = load_baseline(&path).unwrap().unwrap();
    second.scheduler.restore_baseline(restored).await;
    second.x.replace(OperationKind::SubscriptionLevel, vec![sub("Alpha Infra Ltd", 14.0)]);

    let report = second.scheduler.trigger_manual_poll().await.unwrap();
    assert_eq!(report.cycle_number, 2);
    let alerts = second.scheduler.recent_alerts(10).await;
    assert!(alerts.iter().any(|a| a.alert_type == AlertType::Momentum));

    let _ = std::fs::remove_file(&path);
}
