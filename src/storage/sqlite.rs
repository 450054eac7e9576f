//! SQLite backend.
//!
//! Latest records are stored as JSON payloads keyed by `(key, kind)`;
//! time-series points go to an append-only table. Timestamps are RFC 3339
//! text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{kind_rank, OfferingStore, SeriesPoint};
use crate::types::{ReconciledRecord, TrackerError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS offerings (
        key         TEXT NOT NULL,
        kind        INTEGER NOT NULL,
        payload     TEXT NOT NULL,
        updated_at  TEXT NOT NULL,
        PRIMARY KEY (key, kind)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS offering_series (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        key         TEXT NOT NULL,
        series      TEXT NOT NULL,
        value       REAL NOT NULL,
        recorded_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_offering_series_key ON offering_series (key, series, recorded_at)",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

fn storage_err(e: impl std::fmt::Display) -> TrackerError {
    TrackerError::Storage(e.to_string())
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true);

        // In-memory databases exist per connection.
        let in_memory = url.contains(":memory:");
        let mut pool_opts = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_opts = pool_opts.idle_timeout(None::<Duration>).max_lifetime(None::<Duration>);
        }
        let pool = pool_opts
            .connect_with(opts)
            .await
            .with_context(|| format!("Failed to open database: {url}"))?;

        for stmt in SCHEMA {
            sqlx::query(*stmt)
                .execute(&pool)
                .await
                .context("Failed to apply schema")?;
        }

        Ok(Self { pool })
    }

    /// Every point recorded for `key`/`series`, oldest first.
    pub async fn series(&self, key: &str, series: &str) -> Result<Vec<SeriesPoint>, TrackerError> {
        let rows = sqlx::query(
            "SELECT value, recorded_at FROM offering_series WHERE key = ? AND series = ? ORDER BY id",
        )
        .bind(key)
        .bind(series)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|row| {
                let value: f64 = row.try_get("value").map_err(storage_err)?;
                let at: String = row.try_get("recorded_at").map_err(storage_err)?;
                let recorded_at = DateTime::parse_from_rfc3339(&at)
                    .map_err(storage_err)?
                    .with_timezone(&Utc);
                Ok(SeriesPoint { value, recorded_at })
            })
            .collect()
    }
}

#[async_trait]
impl OfferingStore for SqliteStore {
    async fn upsert_by_symbol(&self, record: &ReconciledRecord) -> Result<(), TrackerError> {
        let payload = serde_json::to_string(record).map_err(storage_err)?;
        sqlx::query(
            r#"
            INSERT INTO offerings (key, kind, payload, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (key, kind) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.key)
        .bind(kind_rank(record.kind) as i64)
        .bind(payload)
        .bind(record.last_updated.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(key = %record.key, kind = %record.kind, "Offering upserted");
        Ok(())
    }

    async fn append_time_series(
        &self,
        key: &str,
        series: &str,
        value: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        sqlx::query("INSERT INTO offering_series (key, series, value, recorded_at) VALUES (?, ?, ?, ?)")
            .bind(key)
            .bind(series)
            .bind(value)
            .bind(recorded_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn read_latest_by_key(&self, key: &str) -> Result<Vec<ReconciledRecord>, TrackerError> {
        let rows = sqlx::query("SELECT payload FROM offerings WHERE key = ? ORDER BY kind")
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload").map_err(storage_err)?;
                serde_json::from_str(&payload).map_err(storage_err)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
