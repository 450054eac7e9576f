//! HTTP control surface.
//!
//! Poller control, on-demand reconciliation, stored offerings, source
//! health and quota status. On-demand reconciliation routes are metered
//! by the quota middleware. CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::quota;
use routes::AppState;

/// Bind `port` and serve in a background task.
pub async fn spawn_server(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static(quota::API_KEY_HEADER)]);

    let metered = Router::new()
        .route("/api/offerings/listings", get(routes::get_listings))
        .route("/api/offerings/subscriptions", get(routes::get_subscriptions))
        .route("/api/offerings/premiums", get(routes::get_premiums))
        .route_layer(middleware::from_fn_with_state(state.quota.clone(), quota::enforce));

    Router::new()
        .route("/api/poller/start", post(routes::start_poller))
        .route("/api/poller/stop", post(routes::stop_poller))
        .route("/api/poller/trigger", post(routes::trigger_poll))
        .route("/api/poller/status", get(routes::poller_status))
        .route("/api/poller/alerts", delete(routes::clear_alerts))
        .route("/api/offerings/:key/latest", get(routes::get_latest))
        .route("/api/health/sources", get(routes::source_health))
        .route("/api/health", get(routes::overall_health))
        .route("/api/quota", get(routes::quota_status))
        .route("/health", get(routes::health))
        .merge(metered)
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
