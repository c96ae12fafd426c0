//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::plugin::LoaderSettings;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Plugin loader and hot reload settings.
    pub plugins: LoaderSettings,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            plugins: loader_settings_from_env()?,
        })
    }

    /// Plugin loader settings.
    pub fn loader_settings(&self) -> LoaderSettings {
        self.plugins.clone()
    }
}

/// Load only the plugin settings, for commands that need no database.
///
/// - `PLUGINS_DIR` (default: ./plugins)
/// - `PLUGIN_CONFIG_FILE` (default: {PLUGINS_DIR}/plugins.toml)
/// - `DISABLED_PLUGINS`, comma-separated slugs forced to disabled
/// - `PLUGIN_HOT_RELOAD` (default: false)
/// - `PLUGIN_RELOAD_INTERVAL_MS` (default: 2000)
/// - `PLUGIN_HOOK_TIMEOUT_SECS` (default: 30)
pub fn loader_settings_from_env() -> Result<LoaderSettings> {
    let plugins_dir = env::var("PLUGINS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./plugins"));

    let overrides_file = env::var("PLUGIN_CONFIG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| plugins_dir.join("plugins.toml"));

    let disabled_plugins = parse_list(env::var("DISABLED_PLUGINS").ok().as_deref());

    let hot_reload = parse_bool(env::var("PLUGIN_HOT_RELOAD").ok().as_deref())
        .context("PLUGIN_HOT_RELOAD must be true/false")?;

    let reload_interval = env::var("PLUGIN_RELOAD_INTERVAL_MS")
        .unwrap_or_else(|_| "2000".to_string())
        .parse()
        .map(Duration::from_millis)
        .context("PLUGIN_RELOAD_INTERVAL_MS must be a valid u64")?;

    let hook_timeout = env::var("PLUGIN_HOOK_TIMEOUT_SECS")
        .unwrap_or_else(|_| "30".to_string())
        .parse()
        .map(Duration::from_secs)
        .context("PLUGIN_HOOK_TIMEOUT_SECS must be a valid u64")?;

    Ok(LoaderSettings {
        plugins_dir,
        overrides_file,
        disabled_plugins,
        hook_timeout,
        hot_reload,
        reload_interval,
        ..LoaderSettings::default()
    })
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a boolean flag; unset means false.
pub fn parse_bool(value: Option<&str>) -> Result<bool> {
    match value.map(|v| v.trim().to_lowercase()).as_deref() {
        None | Some("") | Some("0") | Some("false") | Some("no") | Some("off") => Ok(false),
        Some("1") | Some("true") | Some("yes") | Some("on") => Ok(true),
        Some(other) => anyhow::bail!("unrecognized boolean '{other}'"),
    }
}
