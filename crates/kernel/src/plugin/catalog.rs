//! Static plugin registration table.
//!
//! Every plugin the kernel can load is listed here explicitly as a module
//! name plus a constructor. Discovery walks this table in order.

use marketplace_sdk::{Plugin, PluginConfig, PluginFactory, PluginResult};

/// One registered plugin module.
#[derive(Clone)]
pub struct CatalogEntry {
    /// Module (crate) name, used in diagnostics.
    pub module: String,
    /// Constructor.
    pub factory: PluginFactory,
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

/// Ordered list of plugin modules available to the loader.
#[derive(Debug, Clone, Default)]
pub struct PluginCatalog {
    entries: Vec<CatalogEntry>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, builder style.
    pub fn with<F>(mut self, module: impl Into<String>, factory: F) -> Self
    where
        F: Fn(PluginConfig) -> PluginResult<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        self.register(module, factory);
        self
    }

    /// Add a module.
    pub fn register<F>(&mut self, module: impl Into<String>, factory: F)
    where
        F: Fn(PluginConfig) -> PluginResult<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        self.entries.push(CatalogEntry {
            module: module.into(),
            factory: marketplace_sdk::factory(factory),
        });
    }

    /// Entries in registration order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The marketplace's built-in plugin modules.
pub fn builtin() -> PluginCatalog {
    PluginCatalog::new()
        .with("products", products::create)
        .with("cart", cart::create)
        .with("orders", orders::create)
}
