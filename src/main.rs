//! IPO-PULSE: multi-source IPO offering tracker.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires source adapters through the health monitor, restores the alert
//! baseline from disk, serves the control API and polls until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use ipo_pulse::api::{self, routes::ApiState};
use ipo_pulse::config;
use ipo_pulse::engine::aggregator::Aggregator;
use ipo_pulse::engine::scheduler::{PollScheduler, SchedulerSettings};
use ipo_pulse::health::{HealthMonitor, MonitoredSource};
use ipo_pulse::quota::QuotaLedger;
use ipo_pulse::sources;
use ipo_pulse::storage::{self, snapshot};

const BANNER: &str = r#"
 ___ ____   ___        ____  _   _ _     ____  _____
|_ _|  _ \ / _ \      |  _ \| | | | |   / ___|| ____|
 | || |_) | | | |_____| |_) | | | | |   \___ \|  _|
 | ||  __/| |_| |_____|  __/| |_| | |___ ___) | |___
|___|_|    \___/      |_|    \___/|_____|____/|_____|

  Multi-source IPO subscription & grey-market tracker
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        autostart = cfg.scheduler.autostart,
        in_window_secs = cfg.scheduler.in_window_interval_secs,
        off_window_secs = cfg.scheduler.off_window_interval_secs,
        server_enabled = cfg.server.enabled,
        "IPO-PULSE starting up"
    );

    // -- Components ------------------------------------------------------

    let health = Arc::new(HealthMonitor::new(&cfg.health));

    let adapters: Vec<_> = sources::build_adapters(&cfg.sources)?
        .into_iter()
        .map(|a| MonitoredSource::wrap(a, Arc::clone(&health)))
        .collect();
    if adapters.is_empty() {
        warn!("No sources enabled; every poll will fail until one is configured");
    }
    let aggregator = Arc::new(Aggregator::new(adapters));
    info!(sources = ?aggregator.sources(), "Sources registered");

    let store = storage::open(&cfg.storage).await?;
    let settings = SchedulerSettings::from_config(&cfg)?;
    let scheduler = PollScheduler::new(Arc::clone(&aggregator), Arc::clone(&store), settings);
    info!(window = ?scheduler.window(), "Trading window configured");

    let baseline_path = cfg.scheduler.baseline_snapshot_path.clone();
    if let Some(path) = baseline_path.as_deref() {
        match snapshot::load_baseline(path) {
            Ok(Some(baseline)) => scheduler.restore_baseline(baseline).await,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable baseline snapshot"),
        }
    }

    // -- Control API -----------------------------------------------------

    if cfg.server.enabled {
        let state = Arc::new(ApiState {
            scheduler: scheduler.clone(),
            aggregator,
            store,
            health,
            quota: Arc::new(QuotaLedger::new(&cfg.quota)),
        });
        api::spawn_server(state, cfg.server.port).await?;
    }

    if cfg.scheduler.autostart {
        scheduler.start().await;
    } else {
        info!("Autostart disabled. POST /api/poller/start to begin polling.");
    }

    // -- Run until shutdown ----------------------------------------------

    info!("Running. Press Ctrl+C to stop.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received.");

    scheduler.stop().await;

    if let Some(path) = baseline_path.as_deref() {
        let baseline = scheduler.baseline().await;
        if let Err(e) = snapshot::save_baseline(&baseline, path) {
            error!(error = %e, "Failed to save baseline");
        }
    }

    let status = scheduler.status().await;
    info!(
        cycles = status.cycle_count,
        last_poll = ?status.last_poll_time,
        "IPO-PULSE shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ipo_pulse=info"));

    let json_logging = std::env::var("IPO_PULSE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
