//! Core types shared between plugins and the kernel.
//!
//! A plugin describes itself with a [`PluginDescriptor`] and receives its
//! settings as a [`PluginConfig`]. Settings travel as JSON objects so the
//! kernel can merge schema defaults with operator overrides without knowing
//! each plugin's concrete settings type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while building or reading plugin configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Schema defaults must serialize to a JSON object.
    #[error("config schema defaults must be a JSON object, got {kind}")]
    NotAnObject { kind: &'static str },

    /// The merged settings did not match the plugin's settings type.
    #[error("invalid plugin settings: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Identity metadata for a plugin.
///
/// Read once at discovery time and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique machine name; registry key and default route prefix.
    pub slug: String,

    /// Human-readable name.
    pub name: String,

    /// Semantic version (e.g., "1.0.0").
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    /// Slugs that must be active before this plugin activates.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Default settings for this plugin.
    #[serde(default)]
    pub config_schema: ConfigSchema,
}

impl PluginDescriptor {
    /// Create a descriptor with no dependencies and an empty schema.
    pub fn new(slug: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
            dependencies: Vec::new(),
            config_schema: ConfigSchema::default(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Declare a dependency. Repeated slugs are kept once, first position wins.
    pub fn depends_on(mut self, slug: impl Into<String>) -> Self {
        let slug = slug.into();
        if !self.dependencies.contains(&slug) {
            self.dependencies.push(slug);
        }
        self
    }

    /// Attach the settings schema.
    pub fn with_schema(mut self, schema: ConfigSchema) -> Self {
        self.config_schema = schema;
        self
    }

    /// Default URL prefix for the plugin's routes (`/{slug}`).
    pub fn route_prefix(&self) -> String {
        format!("/{}", self.slug)
    }
}

/// Typed configuration shape, stored as its JSON defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSchema {
    defaults: Map<String, Value>,
}

impl ConfigSchema {
    /// Build a schema from the `Default` value of a settings type.
    pub fn of<T: Serialize + Default>() -> Result<Self, ConfigError> {
        match serde_json::to_value(T::default())? {
            Value::Object(defaults) => Ok(Self { defaults }),
            other => Err(ConfigError::NotAnObject {
                kind: json_kind(&other),
            }),
        }
    }

    /// Build a schema directly from a JSON object of defaults.
    pub fn from_defaults(defaults: Map<String, Value>) -> Self {
        Self { defaults }
    }

    /// Default settings.
    pub fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }
}

/// Per-plugin configuration instance.
///
/// `enabled` gates activation; everything else is plugin-specific and read
/// back with [`PluginConfig::settings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, flatten)]
    pub settings: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settings: Map::new(),
        }
    }
}

impl PluginConfig {
    /// Enabled config holding the schema defaults and nothing else.
    pub fn from_schema(schema: &ConfigSchema) -> Self {
        Self {
            enabled: true,
            settings: schema.defaults().clone(),
        }
    }

    /// Deserialize the settings into the plugin's settings type.
    pub fn settings<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        Ok(serde_json::from_value(Value::Object(self.settings.clone()))?)
    }
}

/// Serializable export of a plugin's identity and active configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginMetadata {
    pub slug: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub dependencies: Vec<String>,
    pub config: PluginConfig,
}

impl PluginMetadata {
    /// Combine a descriptor with the config the plugin was built with.
    pub fn new(descriptor: &PluginDescriptor, config: &PluginConfig) -> Self {
        Self {
            slug: descriptor.slug.clone(),
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            description: descriptor.description.clone(),
            author: descriptor.author.clone(),
            dependencies: descriptor.dependencies.clone(),
            config: config.clone(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct CartSettings {
        max_items: u32,
        currency: String,
    }

    impl Default for CartSettings {
        fn default() -> Self {
            Self {
                max_items: 50,
                currency: "EUR".into(),
            }
        }
    }

    #[test]
    fn schema_captures_defaults() {
        let schema = ConfigSchema::of::<CartSettings>().unwrap();
        assert_eq!(schema.defaults()["max_items"], 50);
        assert_eq!(schema.defaults()["currency"], "EUR");
    }

    #[test]
    fn schema_rejects_non_object_defaults() {
        let err = ConfigSchema::of::<u32>().unwrap_err();
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn config_reads_typed_settings() {
        let schema = ConfigSchema::of::<CartSettings>().unwrap();
        let mut config = PluginConfig::from_schema(&schema);
        config.settings.insert("max_items".into(), 5.into());

        let settings: CartSettings = config.settings().unwrap();
        assert_eq!(settings.max_items, 5);
        assert_eq!(settings.currency, "EUR");
    }

    #[test]
    fn empty_config_falls_back_to_serde_defaults() {
        let settings: CartSettings = PluginConfig::default().settings().unwrap();
        assert_eq!(settings, CartSettings::default());
    }

    #[test]
    fn mistyped_setting_is_reported() {
        let mut config = PluginConfig::default();
        config.settings.insert("max_items".into(), "lots".into());
        assert!(config.settings::<CartSettings>().is_err());
    }

    #[test]
    fn config_deserializes_flattened_toml_shape() {
        let config: PluginConfig =
            serde_json::from_value(serde_json::json!({ "enabled": false, "max_items": 3 })).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.settings["max_items"], 3);
        assert!(!config.settings.contains_key("enabled"));
    }

    #[test]
    fn depends_on_deduplicates() {
        let descriptor = PluginDescriptor::new("orders", "Orders", "1.0.0")
            .depends_on("cart")
            .depends_on("catalog")
            .depends_on("cart");
        assert_eq!(descriptor.dependencies, vec!["cart", "catalog"]);
        assert_eq!(descriptor.route_prefix(), "/orders");
    }
}
