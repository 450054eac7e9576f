//! Control-surface route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::engine::aggregator::{AggregateResult, Aggregator};
use crate::engine::scheduler::{CycleReport, PollScheduler, PollStatus};
use crate::health::{HealthMonitor, OverallHealth, SourceStats};
use crate::quota::{credential_from, QuotaDecision, QuotaLedger};
use crate::storage::OfferingStore;
use crate::types::{OperationKind, ReconciledRecord, SourceName, TrackerError};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiState {
    pub scheduler: PollScheduler,
    pub aggregator: Arc<Aggregator>,
    pub store: Arc<dyn OfferingStore>,
    pub health: Arc<HealthMonitor>,
    pub quota: Arc<QuotaLedger>,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Maps domain errors onto HTTP statuses.
pub struct ApiError(pub TrackerError);

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrackerError::Config(_) | TrackerError::UnknownSource(_) => StatusCode::BAD_REQUEST,
            TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
            TrackerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PollerToggleResponse {
    /// Whether this call changed the poller's state.
    pub changed: bool,
    pub running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearedResponse {
    pub cleared: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestResponse {
    pub key: String,
    pub records: Vec<ReconciledRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SourcesQuery {
    /// Comma-separated source names. All registered sources when absent.
    pub sources: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub window_mins: Option<i64>,
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// POST /api/poller/start
pub async fn start_poller(State(state): State<AppState>) -> Json<PollerToggleResponse> {
    let changed = state.scheduler.start().await;
    Json(PollerToggleResponse { changed, running: true })
}

/// POST /api/poller/stop
pub async fn stop_poller(State(state): State<AppState>) -> Json<PollerToggleResponse> {
    let changed = state.scheduler.stop().await;
    Json(PollerToggleResponse { changed, running: false })
}

/// POST /api/poller/trigger
pub async fn trigger_poll(State(state): State<AppState>) -> Result<Json<CycleReport>, ApiError> {
    Ok(Json(state.scheduler.trigger_manual_poll().await?))
}

/// GET /api/poller/status
pub async fn poller_status(State(state): State<AppState>) -> Json<PollStatus> {
    Json(state.scheduler.status().await)
}

/// DELETE /api/poller/alerts
pub async fn clear_alerts(State(state): State<AppState>) -> Json<ClearedResponse> {
    Json(ClearedResponse { cleared: state.scheduler.clear_alerts().await })
}

// ---------------------------------------------------------------------------
// Offerings
// ---------------------------------------------------------------------------

fn parse_sources(aggregator: &Aggregator, raw: Option<&str>) -> Result<Vec<SourceName>, TrackerError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(aggregator.sources()),
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<SourceName>)
            .collect(),
    }
}

async fn aggregate(state: &ApiState, kind: OperationKind, q: &SourcesQuery) -> Result<Json<AggregateResult>, ApiError> {
    let sources = parse_sources(&state.aggregator, q.sources.as_deref())?;
    Ok(Json(state.aggregator.aggregate(kind, &sources).await?))
}

/// GET /api/offerings/listings
pub async fn get_listings(
    State(state): State<AppState>,
    Query(q): Query<SourcesQuery>,
) -> Result<Json<AggregateResult>, ApiError> {
    aggregate(&state, OperationKind::Listing, &q).await
}

/// GET /api/offerings/subscriptions
pub async fn get_subscriptions(
    State(state): State<AppState>,
    Query(q): Query<SourcesQuery>,
) -> Result<Json<AggregateResult>, ApiError> {
    aggregate(&state, OperationKind::SubscriptionLevel, &q).await
}

/// GET /api/offerings/premiums
pub async fn get_premiums(
    State(state): State<AppState>,
    Query(q): Query<SourcesQuery>,
) -> Result<Json<AggregateResult>, ApiError> {
    aggregate(&state, OperationKind::PremiumQuote, &q).await
}

/// GET /api/offerings/:key/latest
pub async fn get_latest(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<LatestResponse>, ApiError> {
    let key = key.trim().to_uppercase();
    let records = state.store.read_latest_by_key(&key).await?;
    if records.is_empty() {
        return Err(TrackerError::NotFound(key).into());
    }
    Ok(Json(LatestResponse { key, records }))
}

// ---------------------------------------------------------------------------
// Health & quota
// ---------------------------------------------------------------------------

/// GET /api/health/sources
pub async fn source_health(
    State(state): State<AppState>,
    Query(q): Query<WindowQuery>,
) -> Json<Vec<SourceStats>> {
    let window = q
        .window_mins
        .filter(|m| *m > 0)
        .and_then(chrono::Duration::try_minutes)
        .map(|w| w.min(state.health.retention()))
        .unwrap_or_else(|| state.health.default_window());
    Json(state.health.all_stats(window))
}

/// GET /api/health
pub async fn overall_health(State(state): State<AppState>) -> Json<OverallHealth> {
    Json(state.health.overall(state.health.default_window()))
}

/// GET /api/quota
pub async fn quota_status(State(state): State<AppState>, headers: HeaderMap) -> Json<QuotaDecision> {
    let credential = credential_from(&headers);
    Json(state.quota.check(credential.as_deref()))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
