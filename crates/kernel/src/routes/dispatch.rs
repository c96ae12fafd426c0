//! Forwarding of requests to plugin routes.
//!
//! The plugin router is rebuilt on every load cycle, so it cannot be merged
//! into the application router once at startup. Instead the application's
//! fallback clones the router from the current snapshot per request; a
//! reload swaps the snapshot and new requests see the new routes at once.

use axum::extract::{Request, State};
use axum::response::Response;
use tower::ServiceExt;

use crate::state::AppState;

/// Serve a request with the live plugin router.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let router = state.plugins().snapshot().router();
    match router.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}
