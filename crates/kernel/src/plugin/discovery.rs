//! Plugin discovery.
//!
//! Instantiates every catalog entry once with a default config to read its
//! descriptor. Broken entries are skipped; a slug provided by two modules is
//! fatal.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use marketplace_sdk::{Plugin, PluginConfig, PluginDescriptor, PluginFactory};
use tracing::{debug, info, warn};

use super::catalog::PluginCatalog;
use super::error::PluginError;

/// A discovered plugin: its descriptor plus a way to build fresh instances.
#[derive(Clone)]
pub struct PluginHandle {
    module: String,
    factory: PluginFactory,
    descriptor: PluginDescriptor,
}

impl PluginHandle {
    /// Module the plugin came from.
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn slug(&self) -> &str {
        &self.descriptor.slug
    }

    /// Build a new instance with the given config.
    pub fn instantiate(&self, config: PluginConfig) -> Result<Box<dyn Plugin>, PluginError> {
        instantiate(&self.module, &self.factory, config)
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("module", &self.module)
            .field("slug", &self.descriptor.slug)
            .finish_non_exhaustive()
    }
}

/// Discovered plugins keyed by slug, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredPlugins {
    handles: Vec<PluginHandle>,
    index: HashMap<String, usize>,
}

impl DiscoveredPlugins {
    pub fn get(&self, slug: &str) -> Option<&PluginHandle> {
        self.index.get(slug).map(|&i| &self.handles[i])
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.index.contains_key(slug)
    }

    /// Position of a slug in discovery order.
    pub fn position(&self, slug: &str) -> Option<usize> {
        self.index.get(slug).copied()
    }

    /// Handles in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginHandle> {
        self.handles.iter()
    }

    pub fn slugs(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.slug().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn insert(&mut self, handle: PluginHandle) -> Result<(), PluginError> {
        if let Some(&existing) = self.index.get(handle.slug()) {
            return Err(PluginError::DuplicateSlug {
                slug: handle.slug().to_string(),
                first: self.handles[existing].module.clone(),
                second: handle.module,
            });
        }
        self.index
            .insert(handle.slug().to_string(), self.handles.len());
        self.handles.push(handle);
        Ok(())
    }
}

/// Discover every plugin in the catalog.
///
/// # Errors
/// Returns [`PluginError::DuplicateSlug`] if two modules produce the same
/// slug. Modules that fail to instantiate or describe themselves are
/// skipped with a warning.
pub fn discover(catalog: &PluginCatalog) -> Result<DiscoveredPlugins, PluginError> {
    let mut discovered = DiscoveredPlugins::default();

    for entry in catalog.entries() {
        let probe = instantiate(&entry.module, &entry.factory, PluginConfig::default())
            .and_then(|plugin| {
                let descriptor = plugin.descriptor().clone();
                validate(&entry.module, &descriptor)?;
                Ok(descriptor)
            });

        let descriptor = match probe {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(module = %entry.module, error = %e, "failed to discover plugin, skipping");
                continue;
            }
        };

        debug!(
            module = %entry.module,
            plugin = %descriptor.slug,
            version = %descriptor.version,
            dependencies = ?descriptor.dependencies,
            "discovered plugin"
        );

        discovered.insert(PluginHandle {
            module: entry.module.clone(),
            factory: entry.factory.clone(),
            descriptor,
        })?;
    }

    info!(
        count = discovered.len(),
        catalog = catalog.len(),
        "plugin discovery complete"
    );
    Ok(discovered)
}

/// Run a plugin constructor, turning errors and panics into [`PluginError`].
fn instantiate(
    module: &str,
    factory: &PluginFactory,
    config: PluginConfig,
) -> Result<Box<dyn Plugin>, PluginError> {
    match catch_panic(|| factory(config)) {
        Ok(Ok(plugin)) => Ok(plugin),
        Ok(Err(e)) => Err(PluginError::Instantiation {
            module: module.to_string(),
            details: format!("{e:#}"),
        }),
        Err(message) => Err(PluginError::Instantiation {
            module: module.to_string(),
            details: format!("constructor panicked: {message}"),
        }),
    }
}

/// Run `f`, converting a panic into its message.
pub(crate) fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
}

/// Text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Validate a descriptor read from a plugin.
fn validate(module: &str, descriptor: &PluginDescriptor) -> Result<(), PluginError> {
    let invalid = |details: String| PluginError::InvalidDescriptor {
        module: module.to_string(),
        details,
    };

    if descriptor.slug.is_empty() {
        return Err(invalid("empty 'slug' field".to_string()));
    }

    if !descriptor
        .slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(invalid(format!(
            "slug '{}' may only contain lowercase letters, digits, '_' and '-'",
            descriptor.slug
        )));
    }

    if descriptor.version.is_empty() {
        return Err(invalid(format!(
            "plugin '{}' has empty 'version' field",
            descriptor.slug
        )));
    }

    Ok(())
}
