//! HTTP API: webhook trigger, run status, job logs and daemon metrics.
//!
//! Provides:
//! - `POST /` - Push notification that starts a run
//! - `/runs`, `/runs/{scope}` - Run snapshots
//! - `/logs/{scope}/{job}` - Stored job logs
//! - `/metrics` - Prometheus metrics export
//! - `/health` - Basic daemon health check

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tracing::warn;

use crate::logstore::{LogStore, is_safe_component};
use crate::metrics;
use crate::webhook::{Launcher, PushPayload, WebhookError};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub launcher: Launcher,
    pub logs: LogStore,
    /// Daemon version.
    pub version: &'static str,
    /// Daemon start time.
    pub started_at: Instant,
    /// Daemon PID.
    pub pid: u32,
}

pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/", post(webhook_handler))
        .route("/runs", get(runs_handler))
        .route("/runs/{scope}", get(run_handler))
        .route("/logs/{scope}/{job}", get(log_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::new(state))
}

/// Handler for `POST /`. Responds once the run has been started.
async fn webhook_handler(
    State(state): State<Arc<HttpState>>,
    Json(payload): Json<PushPayload>,
) -> impl IntoResponse {
    match state.launcher.launch(&payload).await {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(accepted)).into_response(),
        Err(e) => {
            let status = match &e {
                WebhookError::MissingTag | WebhookError::InvalidBranch(_) => StatusCode::BAD_REQUEST,
                WebhookError::Checkout(_) => StatusCode::BAD_GATEWAY,
            };
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn runs_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(state.launcher.registry().snapshots())
}

async fn run_handler(
    State(state): State<Arc<HttpState>>,
    Path(scope): Path<String>,
) -> impl IntoResponse {
    match state.launcher.registry().get(&scope) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no run for scope {scope}") })),
        )
            .into_response(),
    }
}

async fn log_handler(
    State(state): State<Arc<HttpState>>,
    Path((scope, job)): Path<(String, String)>,
) -> impl IntoResponse {
    if !is_safe_component(&scope) || !is_safe_component(&job) {
        return (StatusCode::BAD_REQUEST, "invalid log path").into_response();
    }
    match state.logs.read(&scope, &job).await {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "log not found").into_response()
        }
        Err(e) => {
            warn!(scope = %scope, job = %job, "Failed to read job log: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to read log").into_response()
        }
    }
}

/// Handler for `/metrics` - Prometheus metrics export.
async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            output,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Handler for `/health` - Basic daemon health check.
async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "pid": state.pid,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "active_runs": state.launcher.registry().active_count(),
    }))
}

/// Bind `addr` and serve the API on a spawned task.
pub async fn start_server(
    addr: SocketAddr,
    state: HttpState,
) -> std::io::Result<tokio::task::JoinHandle<Result<(), std::io::Error>>> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening for webhooks on {}", listener.local_addr()?);
    Ok(tokio::spawn(async move { axum::serve(listener, router).await }))
}
