//! Health / heartbeat endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use mailjob_core::JobQueue;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health))]
pub struct HealthApi;

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Heartbeat endpoint.
///
/// Returns `{"status": "ok", "version": "...", "queueDepth": n}` with HTTP 200.
/// `queueDepth` is `null` when the queue cannot be read.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = Value)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let depth = match state.jobs.queue().len().await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(error = %e, "health: queue depth unavailable");
            None
        }
    };
    Json(json!({
        "status":  "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "queueDepth": depth,
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
