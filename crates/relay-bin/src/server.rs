//! Health and metrics HTTP surface.
//!
//! ## Routes
//!
//! - `GET /health`: liveness, always 200 while the process runs.
//! - `GET /health/detailed`: database, stream and backlog checks; 503 when a
//!   dependency check fails.
//! - `GET /metrics`: JSON metrics snapshot.
//! - `POST /metrics/reset`: clear counters (the backlog gauge is kept).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use event_stream::StreamTransport;
use outbox_database::{queries, AsyncDatabase, OutboxStats};
use pipeline_metrics::{ComponentCheck, HealthReport, PipelineMetrics};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub const SERVICE_NAME: &str = "outbox-relay";

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: AsyncDatabase,
    pub transport: Arc<dyn StreamTransport>,
    pub metrics: Arc<PipelineMetrics>,
}

/// `/health/detailed` body.
#[derive(Debug, Serialize)]
pub struct DetailedHealth {
    #[serde(flatten)]
    pub report: HealthReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox: Option<OutboxStats>,
}

/// Run every dependency check and classify the result.
pub async fn detailed_health(state: &AppState) -> DetailedHealth {
    let database = ComponentCheck::from_result("database", state.db.health_check().await);
    let stream = ComponentCheck::from_result("stream", state.transport.ping().await);

    let outbox = match state.db.call(|conn| queries::outbox_stats(conn)).await {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!(error = %e, "Failed to read outbox statistics");
            None
        }
    };

    // Fresh count when the database answers, last sampled gauge otherwise.
    let backlog = match state.db.call(|conn| queries::count_backlog(conn)).await {
        Ok(backlog) => {
            state.metrics.set_backlog(backlog);
            backlog
        }
        Err(_) => state.metrics.backlog(),
    };

    DetailedHealth {
        report: HealthReport::new(vec![database, stream], backlog, Utc::now()),
        outbox,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/detailed", get(detailed_health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/metrics/reset", post(reset_metrics_handler))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(state: AppState, addr: &str, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Health server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "timestamp": Utc::now(),
    }))
}

async fn detailed_health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = detailed_health(&state).await;
    let status = if health.report.status.is_available() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

async fn reset_metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.reset();
    info!("Metrics reset");
    Json(json!({ "reset": true }))
}
