//! HTTP route handlers.

pub mod dispatch;
pub mod health;
pub mod plugin_admin;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router.
///
/// Kernel routes are matched first; every other request goes to the live
/// plugin router of the current snapshot.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(plugin_admin::router())
        .fallback(dispatch::dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
