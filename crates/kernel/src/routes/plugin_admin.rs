//! Plugin introspection and manual reload.
//!
//! The read handlers answer from the published snapshot and never wait on a
//! load cycle in progress.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use marketplace_sdk::PluginMetadata;

use crate::error::{AppError, AppResult};
use crate::plugin::LoadReport;
use crate::state::AppState;

/// Active plugins in activation order.
///
/// GET /admin/plugins
async fn list_plugins(State(state): State<AppState>) -> Json<Vec<PluginMetadata>> {
    Json(state.plugins().snapshot().plugins.clone())
}

/// Route path -> owning plugin.
///
/// GET /admin/plugins/routes
async fn list_routes(State(state): State<AppState>) -> Json<BTreeMap<String, String>> {
    Json(state.plugins().snapshot().routes.clone())
}

/// Last load report.
///
/// GET /admin/plugins/report
async fn load_report(State(state): State<AppState>) -> Json<LoadReport> {
    Json(state.plugins().snapshot().report.clone())
}

/// One active plugin.
///
/// GET /admin/plugins/{slug}
async fn get_plugin(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<PluginMetadata>> {
    state
        .plugins()
        .snapshot()
        .get(&slug)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("plugin '{slug}' is not active")))
}

/// Shut every plugin down and load from scratch.
///
/// POST /admin/plugins/reload
async fn reload_plugins(State(state): State<AppState>) -> AppResult<Json<LoadReport>> {
    let snapshot = state.plugins().reload().await?;
    Ok(Json(snapshot.report.clone()))
}

/// Create the plugin admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/plugins", get(list_plugins))
        .route("/admin/plugins/routes", get(list_routes))
        .route("/admin/plugins/report", get(load_report))
        .route("/admin/plugins/reload", post(reload_plugins))
        .route("/admin/plugins/{slug}", get(get_plugin))
}
