//! Marketplace Plugin SDK
//!
//! Types and traits for marketplace feature plugins. Every plugin crate
//! implements [`Plugin`] and exposes a constructor matching
//! [`PluginFactory`]; the kernel discovers, orders and activates them.

pub mod plugin;
pub mod routes;
pub mod types;

pub use plugin::{PeerLookup, Plugin, PluginFactory, PluginHost, PluginResult, factory};
pub use routes::RouteRegistrar;
pub use types::{ConfigError, ConfigSchema, PluginConfig, PluginDescriptor, PluginMetadata};

// Re-exported so plugin crates build routes against the same axum version.
#[doc(hidden)]
pub use axum;

pub mod prelude {
    pub use crate::plugin::*;
    pub use crate::routes::RouteRegistrar;
    pub use crate::types::*;
    pub use async_trait::async_trait;
    pub use sqlx::PgPool;
}
