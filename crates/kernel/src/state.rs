//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::plugin::{PluginCatalog, PluginLoader, PluginRuntime};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// PostgreSQL connection pool.
    db: PgPool,

    /// Plugin runtime; owns the loader and the published snapshot.
    plugins: Arc<PluginRuntime>,
}

impl AppState {
    /// Connect to the database and build the plugin runtime.
    ///
    /// Plugins are not loaded yet; call [`PluginRuntime::load`].
    pub async fn new(config: &Config, catalog: PluginCatalog) -> Result<Self> {
        let db = db::create_pool(config)
            .await
            .context("failed to create database pool")?;
        info!(
            max_connections = config.database_max_connections,
            "database pool created"
        );

        let loader = PluginLoader::new(config.loader_settings(), catalog);
        Ok(Self::from_parts(db.clone(), Arc::new(PluginRuntime::new(loader, db))))
    }

    /// Assemble state from an existing pool and runtime.
    pub fn from_parts(db: PgPool, plugins: Arc<PluginRuntime>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { db, plugins }),
        }
    }

    /// Get the database pool.
    pub fn db(&self) -> &PgPool {
        &self.inner.db
    }

    /// Get the plugin runtime.
    pub fn plugins(&self) -> &Arc<PluginRuntime> {
        &self.inner.plugins
    }

    /// Check if PostgreSQL is reachable.
    pub async fn postgres_healthy(&self) -> bool {
        db::check_health(&self.inner.db).await
    }
}
