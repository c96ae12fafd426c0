//! Plugin system for the marketplace kernel.
//!
//! This module handles:
//! - Discovering plugins from the compiled-in catalog
//! - Resolving a deterministic, dependency-respecting load order
//! - Activating plugins one at a time, isolating per-plugin failures
//! - Publishing the active set and live router to request handlers
//! - Rebuilding everything when plugin files change (development only)

mod catalog;
pub mod cli;
mod dependency;
mod discovery;
mod error;
mod loader;
mod overrides;
mod registry;
mod runtime;
mod watcher;

pub use catalog::{CatalogEntry, PluginCatalog, builtin};
pub use dependency::{check_dependencies, resolve_load_order};
pub use discovery::{DiscoveredPlugins, PluginHandle, discover};
pub use error::PluginError;
pub use loader::{ActivationFailure, LoadOutcome, LoadReport, LoaderSettings, PluginLoader};
pub use overrides::ConfigOverrides;
pub use registry::PluginRegistry;
pub use runtime::{PluginRuntime, PluginSnapshot};
pub use watcher::{FileSnapshot, HotReloadWatcher, Reloader, WatcherHandle, scan};
