#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Everything here drives the real loader and router; only the plugins are
//! fakes, and the database pool never connects.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use marketplace_kernel::plugin::{
    ConfigOverrides, LoaderSettings, PluginCatalog, PluginLoader, PluginRuntime,
};
use marketplace_kernel::routes;
use marketplace_kernel::state::AppState;
use marketplace_test_utils::lazy_pool;

/// Loader settings with a short hook timeout.
pub fn settings() -> LoaderSettings {
    LoaderSettings {
        hook_timeout: Duration::from_millis(250),
        ..LoaderSettings::default()
    }
}

/// Loader over `catalog` with fixed overrides.
pub fn loader(catalog: PluginCatalog, overrides: ConfigOverrides) -> PluginLoader {
    PluginLoader::new(settings(), catalog).with_overrides(overrides)
}

/// Runtime over `catalog` with no overrides.
pub fn runtime(catalog: PluginCatalog) -> Arc<PluginRuntime> {
    Arc::new(PluginRuntime::new(
        loader(catalog, ConfigOverrides::new()),
        lazy_pool(),
    ))
}

/// Full application router around a runtime.
pub fn app(runtime: Arc<PluginRuntime>) -> Router {
    routes::app(AppState::from_parts(lazy_pool(), runtime))
}

/// Send a GET request and return status and body text.
pub async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Send a GET request and parse the body as JSON.
pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_str(&body).unwrap())
}

/// Send an empty POST request and parse the body as JSON.
pub async fn post_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}
