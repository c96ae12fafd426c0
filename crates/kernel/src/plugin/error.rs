//! Plugin system error types with clear, actionable messages.
//!
//! All errors include the plugin slug and relevant context to help
//! developers quickly identify and fix issues.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during discovery, resolution and activation.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin constructor returned an error or panicked.
    #[error("plugin module '{module}': failed to instantiate: {details}")]
    Instantiation { module: String, details: String },

    /// The descriptor returned by the plugin is unusable.
    #[error("plugin module '{module}': invalid descriptor: {details}")]
    InvalidDescriptor { module: String, details: String },

    /// Two catalog entries claim the same slug.
    #[error(
        "duplicate plugin slug '{slug}': provided by both '{first}' and '{second}'. Rename one of them"
    )]
    DuplicateSlug {
        slug: String,
        first: String,
        second: String,
    },

    /// Plugin depends on another plugin that was never discovered.
    #[error("plugin '{plugin}': depends on '{dependency}' which is not installed")]
    MissingDependency { plugin: String, dependency: String },

    /// Circular dependency detected.
    #[error("circular dependency detected involving plugins: {}", .plugins.join(", "))]
    CircularDependency { plugins: Vec<String> },

    /// A dependency was discovered but is not active in this cycle.
    #[error("plugin '{plugin}': dependency '{dependency}' is not active")]
    DependencyInactive { plugin: String, dependency: String },

    /// Plugin tried to claim a path owned by another plugin.
    #[error("plugin '{plugin}': route conflict on '{path}', already owned by '{owner}'")]
    RouteConflict {
        plugin: String,
        path: String,
        owner: String,
    },

    /// Override or merged settings are not valid for this plugin.
    #[error("plugin '{plugin}': invalid configuration: {details}")]
    InvalidConfig { plugin: String, details: String },

    /// A lifecycle hook returned an error.
    #[error("plugin '{plugin}': {hook} failed: {details}")]
    HookFailed {
        plugin: String,
        hook: &'static str,
        details: String,
    },

    /// A lifecycle hook did not finish in time.
    #[error("plugin '{plugin}': {hook} timed out after {timeout:?}")]
    HookTimeout {
        plugin: String,
        hook: &'static str,
        timeout: Duration,
    },

    /// The overrides file could not be read or parsed.
    #[error("plugin overrides '{path}': {details}")]
    InvalidOverrides { path: String, details: String },

    /// The task running a load cycle died before finishing it.
    #[error("plugin load cycle aborted: {details}")]
    CycleAborted { details: String },
}

impl PluginError {
    /// Whether this error aborts the whole load cycle.
    ///
    /// Resolution errors mean the dependency graph is structurally broken and
    /// nothing may start; everything else is isolated to one plugin.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSlug { .. }
                | Self::MissingDependency { .. }
                | Self::CircularDependency { .. }
                | Self::InvalidOverrides { .. }
                | Self::CycleAborted { .. }
        )
    }

    /// Create a hook failure error from the hook's own error.
    pub fn hook_failed(plugin: impl Into<String>, hook: &'static str, err: &anyhow::Error) -> Self {
        Self::HookFailed {
            plugin: plugin.into(),
            hook,
            details: format!("{err:#}"),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(plugin: impl Into<String>, details: impl std::fmt::Display) -> Self {
        Self::InvalidConfig {
            plugin: plugin.into(),
            details: details.to_string(),
        }
    }
}
