//! Health check endpoint.
//!
//! Returns 200 OK if PostgreSQL is reachable and the last plugin load cycle
//! was not aborted, 503 Service Unavailable otherwise.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    postgres: bool,
    plugins_active: usize,
    plugins_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    plugin_error: Option<String>,
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let postgres = state.postgres_healthy().await;
    let snapshot = state.plugins().snapshot();
    let healthy = postgres && snapshot.last_error.is_none();

    let (status, status_code) = if healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            postgres,
            plugins_active: snapshot.plugins.len(),
            plugins_failed: snapshot.report.failed.len(),
            plugin_error: snapshot.last_error.clone(),
        }),
    )
}

/// Create the health check router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
