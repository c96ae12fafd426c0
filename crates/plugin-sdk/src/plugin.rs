//! The plugin contract.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::routes::RouteRegistrar;
use crate::types::{PluginConfig, PluginDescriptor, PluginMetadata};

/// Result type for plugin hooks.
pub type PluginResult<T = ()> = anyhow::Result<T>;

/// Constructor for a plugin.
///
/// The kernel calls it once at discovery with a default config to read the
/// descriptor, then again on every load cycle with the merged config.
pub type PluginFactory =
    Arc<dyn Fn(PluginConfig) -> PluginResult<Box<dyn Plugin>> + Send + Sync>;

/// Wrap a constructor function as a [`PluginFactory`].
pub fn factory<F>(f: F) -> PluginFactory
where
    F: Fn(PluginConfig) -> PluginResult<Box<dyn Plugin>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Read-only view of the other active plugins.
pub trait PeerLookup: Send + Sync {
    /// Whether a plugin with this slug is currently active.
    fn is_active(&self, slug: &str) -> bool;

    /// Descriptor of an active plugin.
    fn descriptor(&self, slug: &str) -> Option<PluginDescriptor>;
}

/// What the kernel hands to lifecycle hooks.
pub struct PluginHost<'a> {
    db: &'a PgPool,
    peers: &'a dyn PeerLookup,
}

impl<'a> PluginHost<'a> {
    pub fn new(db: &'a PgPool, peers: &'a dyn PeerLookup) -> Self {
        Self { db, peers }
    }

    /// Shared database pool.
    pub fn db(&self) -> &PgPool {
        self.db
    }

    /// Plugins activated so far.
    pub fn peers(&self) -> &dyn PeerLookup {
        self.peers
    }
}

/// A marketplace feature plugin.
///
/// Hooks run strictly one plugin at a time, in dependency order. `init_db`
/// and `register_routes` may run again after a hot reload, so both must be
/// idempotent.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Identity metadata.
    fn descriptor(&self) -> &PluginDescriptor;

    /// Configuration this instance was built with.
    fn config(&self) -> &PluginConfig;

    fn slug(&self) -> &str {
        &self.descriptor().slug
    }

    /// Attach the plugin's HTTP routes.
    fn register_routes(&self, routes: &mut RouteRegistrar);

    /// Create tables, run migrations, seed data.
    async fn init_db(&self, _db: &PgPool) -> PluginResult {
        Ok(())
    }

    async fn on_startup(&self, _host: &PluginHost<'_>) -> PluginResult {
        Ok(())
    }

    async fn on_shutdown(&self, _host: &PluginHost<'_>) -> PluginResult {
        Ok(())
    }

    /// Export identity and active configuration for introspection.
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(self.descriptor(), self.config())
    }
}
