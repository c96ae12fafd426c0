//! Route registration target handed to [`Plugin::register_routes`].
//!
//! The kernel calls `register_routes` twice per activation: once against a
//! dry-run registrar that only records paths (used for conflict detection),
//! then against a live registrar that also builds the axum router.
//!
//! [`Plugin::register_routes`]: crate::Plugin::register_routes

use axum::Router;
use axum::routing::MethodRouter;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    DryRun,
    Live,
}

/// Collects the routes a plugin wants to serve.
///
/// Registering a path the registrar already holds is a no-op, so calling
/// `register_routes` more than once against the same target never produces
/// duplicate entries.
pub struct RouteRegistrar {
    mode: Mode,
    paths: Vec<String>,
    router: Router,
}

impl RouteRegistrar {
    /// Registrar that records paths without building handlers.
    pub fn dry_run() -> Self {
        Self {
            mode: Mode::DryRun,
            paths: Vec::new(),
            router: Router::new(),
        }
    }

    /// Registrar that records paths and builds a live router.
    pub fn live() -> Self {
        Self {
            mode: Mode::Live,
            paths: Vec::new(),
            router: Router::new(),
        }
    }

    /// Whether this registrar discards handlers.
    pub fn is_dry_run(&self) -> bool {
        self.mode == Mode::DryRun
    }

    /// Register a handler for `path`.
    pub fn route(&mut self, path: &str, handler: MethodRouter) -> &mut Self {
        if self.paths.iter().any(|p| p == path) {
            debug!(path, "route already registered, ignoring");
            return self;
        }
        self.paths.push(path.to_string());

        if self.mode == Mode::Live {
            let router = std::mem::take(&mut self.router);
            self.router = router.route(path, handler);
        }
        self
    }

    /// Paths registered so far, in registration order.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Consume the registrar, returning the router built in live mode.
    ///
    /// A dry-run registrar always yields an empty router.
    pub fn into_router(self) -> Router {
        self.router
    }
}

impl std::fmt::Debug for RouteRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRegistrar")
            .field("mode", &self.mode)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}
