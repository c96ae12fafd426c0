//! Registry of active plugins and the routes they own.
//!
//! Written only by the loader, one plugin at a time; read by hooks (through
//! [`PeerLookup`]) and by the admin surface through published snapshots.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use marketplace_sdk::{PeerLookup, Plugin, PluginDescriptor};

use super::error::PluginError;

/// Active plugins keyed by slug, plus route ownership.
#[derive(Default)]
pub struct PluginRegistry {
    /// Plugins in activation order.
    plugins: Vec<Arc<dyn Plugin>>,
    /// Slug -> index into `plugins`.
    index: HashMap<String, usize>,
    /// Route path -> owning slug.
    route_owner: BTreeMap<String, String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin, replacing any previous instance with the same slug.
    pub fn add(&mut self, plugin: Arc<dyn Plugin>) {
        let slug = plugin.slug().to_string();
        match self.index.get(&slug) {
            Some(&i) => self.plugins[i] = plugin,
            None => {
                self.index.insert(slug, self.plugins.len());
                self.plugins.push(plugin);
            }
        }
    }

    /// Remove a plugin. Its route claims are left untouched.
    pub fn remove(&mut self, slug: &str) -> Option<Arc<dyn Plugin>> {
        let i = self.index.remove(slug)?;
        let removed = self.plugins.remove(i);
        for idx in self.index.values_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        Some(removed)
    }

    pub fn get(&self, slug: &str) -> Option<Arc<dyn Plugin>> {
        self.index.get(slug).map(|&i| self.plugins[i].clone())
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.index.contains_key(slug)
    }

    /// Plugins in activation order.
    pub fn list(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.clone()
    }

    /// Slugs in activation order.
    pub fn slugs(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.slug().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Claim a route path for a plugin.
    ///
    /// Reclaiming a path the plugin already owns is a no-op.
    ///
    /// # Errors
    /// Returns [`PluginError::RouteConflict`] if another plugin owns `path`.
    pub fn claim_route(&mut self, path: &str, slug: &str) -> Result<(), PluginError> {
        match self.route_owner.get(path) {
            Some(owner) if owner != slug => Err(PluginError::RouteConflict {
                plugin: slug.to_string(),
                path: path.to_string(),
                owner: owner.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                self.route_owner.insert(path.to_string(), slug.to_string());
                Ok(())
            }
        }
    }

    /// Drop every route claimed by `slug`. Returns how many were released.
    pub fn release_routes(&mut self, slug: &str) -> usize {
        let before = self.route_owner.len();
        self.route_owner.retain(|_, owner| owner != slug);
        before - self.route_owner.len()
    }

    /// Owner of a route path.
    pub fn route_owner(&self, path: &str) -> Option<&str> {
        self.route_owner.get(path).map(String::as_str)
    }

    /// Snapshot of route ownership, ordered by path.
    pub fn routes(&self) -> BTreeMap<String, String> {
        self.route_owner.clone()
    }

    /// Forget every plugin and route.
    pub fn clear(&mut self) {
        self.plugins.clear();
        self.index.clear();
        self.route_owner.clear();
    }
}

impl PeerLookup for PluginRegistry {
    fn is_active(&self, slug: &str) -> bool {
        self.contains(slug)
    }

    fn descriptor(&self, slug: &str) -> Option<PluginDescriptor> {
        self.get(slug).map(|p| p.descriptor().clone())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.slugs())
            .field("routes", &self.route_owner)
            .finish()
    }
}
