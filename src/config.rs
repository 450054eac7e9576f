//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (source API keys) are referenced by env-var name in the config
//! and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::sources::Backoff;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub trading_window: TradingWindowConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Start polling as soon as the process boots.
    #[serde(default)]
    pub autostart: bool,
    /// Delay between cycles inside the trading window.
    #[serde(default = "default_in_window_secs")]
    pub in_window_interval_secs: u64,
    /// Delay between cycles outside it.
    #[serde(default = "default_off_window_secs")]
    pub off_window_interval_secs: u64,
    /// Sources queried for subscription levels each cycle.
    #[serde(default = "default_subscription_sources")]
    pub subscription_sources: Vec<String>,
    /// Sources queried for grey-market premiums each cycle.
    #[serde(default = "default_premium_sources")]
    pub premium_sources: Vec<String>,
    #[serde(default = "default_alert_buffer_cap")]
    pub alert_buffer_cap: usize,
    /// Where previous-value baselines are saved on shutdown.
    #[serde(default)]
    pub baseline_snapshot_path: Option<String>,
}

fn default_in_window_secs() -> u64 { 5 * 60 }
fn default_off_window_secs() -> u64 { 30 * 60 }
fn default_alert_buffer_cap() -> usize { 100 }
fn default_subscription_sources() -> Vec<String> {
    vec!["nse".into(), "chittorgarh".into(), "investorgain".into()]
}
fn default_premium_sources() -> Vec<String> {
    vec!["investorgain".into(), "ipocentral".into(), "chittorgarh".into()]
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            autostart: false,
            in_window_interval_secs: default_in_window_secs(),
            off_window_interval_secs: default_off_window_secs(),
            subscription_sources: default_subscription_sources(),
            premium_sources: default_premium_sources(),
            alert_buffer_cap: default_alert_buffer_cap(),
            baseline_snapshot_path: None,
        }
    }
}

/// Local-time bidding window, e.g. Mon–Fri 10:00–17:00.
#[derive(Debug, Deserialize, Clone)]
pub struct TradingWindowConfig {
    #[serde(default = "default_weekdays")]
    pub weekdays: Vec<String>,
    /// "HH:MM", inclusive.
    #[serde(default = "default_window_start")]
    pub start: String,
    /// "HH:MM", exclusive.
    #[serde(default = "default_window_end")]
    pub end: String,
}

fn default_weekdays() -> Vec<String> {
    ["mon", "tue", "wed", "thu", "fri"].iter().map(|s| s.to_string()).collect()
}
fn default_window_start() -> String { "10:00".into() }
fn default_window_end() -> String { "17:00".into() }

impl Default for TradingWindowConfig {
    fn default() -> Self {
        Self {
            weekdays: default_weekdays(),
            start: default_window_start(),
            end: default_window_end(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    #[serde(default = "default_critical_total")]
    pub critical_subscription: f64,
    #[serde(default = "default_warning_total")]
    pub warning_subscription: f64,
    #[serde(default = "default_momentum_delta")]
    pub momentum_delta: f64,
    #[serde(default = "default_premium_change_pct")]
    pub premium_change_pct: f64,
}

fn default_critical_total() -> f64 { 20.0 }
fn default_warning_total() -> f64 { 10.0 }
fn default_momentum_delta() -> f64 { 5.0 }
fn default_premium_change_pct() -> f64 { 10.0 }

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            critical_subscription: default_critical_total(),
            warning_subscription: default_warning_total(),
            momentum_delta: default_momentum_delta(),
            premium_change_pct: default_premium_change_pct(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// Trailing window used when a query does not name one.
    #[serde(default = "default_health_window_mins")]
    pub default_window_mins: i64,
    /// Call events older than this are dropped.
    #[serde(default = "default_health_retention_hours")]
    pub retention_hours: i64,
}

fn default_health_window_mins() -> i64 { 60 }
fn default_health_retention_hours() -> i64 { 24 * 7 }

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            default_window_mins: default_health_window_mins(),
            retention_hours: default_health_retention_hours(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    #[serde(default = "default_tier")]
    pub default_tier: String,
    /// Tier name → daily ceiling. A negative ceiling means unlimited.
    #[serde(default = "default_tiers")]
    pub tiers: HashMap<String, i64>,
    /// API key → tier name.
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

fn default_tier() -> String { "free".into() }
fn default_tiers() -> HashMap<String, i64> {
    HashMap::from([
        ("free".to_string(), 100),
        ("pro".to_string(), 5_000),
        ("enterprise".to_string(), -1),
    ])
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_tier: default_tier(),
            tiers: default_tiers(),
            credentials: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_true() -> bool { true }
fn default_port() -> u16 { 8080 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { enabled: true, port: default_port() }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// e.g. "sqlite://ipo_pulse.db". In-memory store when absent.
    #[serde(default)]
    pub database_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    pub nse: Option<SourceConfig>,
    pub chittorgarh: Option<SourceConfig>,
    pub investorgain: Option<SourceConfig>,
    pub ipocentral: Option<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: Backoff,
    /// Env var holding the provider API key, if it needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_timeout_secs() -> u64 { 15 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_backoff() -> Backoff { Backoff::Linear }

impl SourceConfig {
    /// A config pointing at `base_url` with default retry settings.
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            enabled: true,
            base_url: base_url.to_string(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff: default_backoff(),
            api_key_env: None,
        }
    }

    /// Resolve the configured API key, if any.
    pub fn api_key(&self) -> Option<SecretString> {
        self.api_key_env
            .as_deref()
            .and_then(|env| std::env::var(env).ok())
            .filter(|k| !k.is_empty())
            .map(SecretString::new)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }
}
