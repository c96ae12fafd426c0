//! Operator-supplied plugin configuration overrides.
//!
//! Overrides live in a TOML file with one table per plugin slug:
//!
//! ```toml
//! [cart]
//! enabled = true
//! max_items = 50
//! ```
//!
//! `enabled` maps onto [`PluginConfig::enabled`]; every other key is merged
//! over the plugin's schema defaults, recursing into nested tables.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use marketplace_sdk::{PluginConfig, PluginDescriptor};
use serde_json::{Map, Value};
use tracing::debug;

use super::error::PluginError;

/// Per-slug overrides plus a force-disabled set.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    entries: HashMap<String, Map<String, Value>>,
    disabled: HashSet<String>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from a TOML file. A missing file yields no overrides.
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        if !path.exists() {
            debug!(path = %path.display(), "no plugin overrides file");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| PluginError::InvalidOverrides {
            path: path.display().to_string(),
            details: format!("failed to read: {e}"),
        })?;

        Self::parse_str(&content, path)
    }

    /// Parse overrides from a TOML string.
    pub fn parse_str(content: &str, path: &Path) -> Result<Self, PluginError> {
        let invalid = |details: String| PluginError::InvalidOverrides {
            path: path.display().to_string(),
            details,
        };

        let tables: Map<String, Value> =
            toml::from_str(content).map_err(|e| invalid(format!("failed to parse TOML: {e}")))?;

        let mut overrides = Self::default();
        for (slug, value) in tables {
            let Value::Object(table) = value else {
                return Err(invalid(format!(
                    "'{slug}' must be a table of settings"
                )));
            };
            overrides.entries.insert(slug, table);
        }
        Ok(overrides)
    }

    /// Set the override table for one plugin.
    pub fn with(mut self, slug: impl Into<String>, table: Map<String, Value>) -> Self {
        self.entries.insert(slug.into(), table);
        self
    }

    /// Force plugins to `enabled = false` regardless of their table.
    pub fn disable<I, S>(mut self, slugs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled.extend(slugs.into_iter().map(Into::into));
        self
    }

    pub fn get(&self, slug: &str) -> Option<&Map<String, Value>> {
        self.entries.get(slug)
    }

    pub fn is_force_disabled(&self, slug: &str) -> bool {
        self.disabled.contains(slug)
    }

    /// Build the config for a plugin: schema defaults, then its override.
    ///
    /// # Errors
    /// Returns [`PluginError::InvalidConfig`] if `enabled` is not a boolean.
    pub fn config_for(&self, descriptor: &PluginDescriptor) -> Result<PluginConfig, PluginError> {
        let mut config = PluginConfig::from_schema(&descriptor.config_schema);

        if let Some(table) = self.entries.get(&descriptor.slug) {
            for (key, value) in table {
                if key == "enabled" {
                    config.enabled = value.as_bool().ok_or_else(|| {
                        PluginError::invalid_config(
                            &descriptor.slug,
                            format!("'enabled' must be a boolean, got {value}"),
                        )
                    })?;
                    continue;
                }
                match config.settings.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        config.settings.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        if self.is_force_disabled(&descriptor.slug) {
            config.enabled = false;
        }

        Ok(config)
    }
}

/// Merge `patch` into `base`, recursing where both sides are objects.
fn merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}
