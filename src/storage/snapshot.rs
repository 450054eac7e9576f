//! Previous-value baseline snapshot.
//!
//! Saves the scheduler's previous-total and previous-premium maps to a JSON
//! file so delta alerts (momentum, premium moves) keep working across
//! restarts. A missing file is a fresh start.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default)]
    pub previous_totals: HashMap<String, f64>,
    #[serde(default)]
    pub previous_premiums: HashMap<String, f64>,
    #[serde(default)]
    pub cycle_count: u64,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

pub fn save_baseline(baseline: &Baseline, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(baseline).context("Failed to serialise baseline")?;
    std::fs::write(path, &json).with_context(|| format!("Failed to write baseline to {path}"))?;
    debug!(
        path,
        totals = baseline.previous_totals.len(),
        premiums = baseline.previous_premiums.len(),
        "Baseline saved"
    );
    Ok(())
}

/// Returns `None` when the file does not exist.
pub fn load_baseline(path: &str) -> Result<Option<Baseline>> {
    if !Path::new(path).exists() {
        info!(path, "No baseline snapshot found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read baseline from {path}"))?;
    let baseline: Baseline =
        serde_json::from_str(&json).with_context(|| format!("Failed to parse baseline from {path}"))?;

    info!(
        path,
        totals = baseline.previous_totals.len(),
        premiums = baseline.previous_premiums.len(),
        cycle_count = baseline.cycle_count,
        "Baseline loaded"
    );
    Ok(Some(baseline))
}
