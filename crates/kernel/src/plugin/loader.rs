//! Plugin loader.
//!
//! Drives one load cycle: discovery, dependency resolution, then sequential
//! activation of every plugin in dependency order. Resolution errors abort
//! the cycle; anything that goes wrong while activating a single plugin only
//! excludes that plugin.
//!
//! Activation is transactional per plugin: if any step fails, the plugin's
//! registry entry and route claims are rolled back and its routes never
//! reach the live router. A plugin whose `on_startup` fails still gets
//! `on_shutdown`, so it can release whatever startup acquired; a plugin that
//! fails earlier never sees `on_startup` and is not shut down.
//!
//! Async hooks run under a timeout and a panic guard: a hook that hangs or
//! panics fails only its own plugin.

use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use marketplace_sdk::{Plugin, PluginHost, PluginResult, RouteRegistrar};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use super::catalog::PluginCatalog;
use super::dependency::{check_dependencies, resolve_load_order};
use super::discovery::{PluginHandle, catch_panic, discover, panic_message};
use super::error::PluginError;
use super::overrides::ConfigOverrides;
use super::registry::PluginRegistry;

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// Directory the hot-reload watcher observes.
    pub plugins_dir: PathBuf,
    /// TOML file with per-plugin overrides, re-read every cycle.
    pub overrides_file: PathBuf,
    /// Plugins forced to `enabled = false`.
    pub disabled_plugins: Vec<String>,
    /// Upper bound for each lifecycle hook.
    pub hook_timeout: Duration,
    /// Whether the hot-reload watcher runs.
    pub hot_reload: bool,
    /// Watcher poll interval.
    pub reload_interval: Duration,
    /// File extensions the watcher tracks.
    pub watch_extensions: Vec<String>,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        let plugins_dir = PathBuf::from("./plugins");
        Self {
            overrides_file: plugins_dir.join("plugins.toml"),
            plugins_dir,
            disabled_plugins: Vec::new(),
            hook_timeout: Duration::from_secs(30),
            hot_reload: false,
            reload_interval: Duration::from_secs(2),
            watch_extensions: vec!["toml".to_string(), "rs".to_string()],
        }
    }
}

/// A plugin excluded from the active set because activation failed.
#[derive(Debug, Clone, Serialize)]
pub struct ActivationFailure {
    pub slug: String,
    pub module: String,
    pub error: String,
}

/// Summary of one load cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Monotonic cycle counter, starting at 1.
    pub generation: u64,
    pub started_at: Option<DateTime<Utc>>,
    /// Resolved activation order.
    pub order: Vec<String>,
    /// Successfully activated plugins, in activation order.
    pub active: Vec<String>,
    /// Plugins skipped because `enabled = false`.
    pub disabled: Vec<String>,
    pub failed: Vec<ActivationFailure>,
}

/// Result of a successful load cycle.
pub struct LoadOutcome {
    pub report: LoadReport,
    /// Merged routes of every active plugin.
    pub router: Router,
}

enum Activation {
    Active(Router),
    Disabled,
}

/// Discovers, orders and activates plugins, owning the registry.
pub struct PluginLoader {
    settings: LoaderSettings,
    catalog: PluginCatalog,
    overrides: Option<ConfigOverrides>,
    registry: PluginRegistry,
    generation: u64,
}

impl PluginLoader {
    pub fn new(settings: LoaderSettings, catalog: PluginCatalog) -> Self {
        Self {
            settings,
            catalog,
            overrides: None,
            registry: PluginRegistry::new(),
            generation: 0,
        }
    }

    /// Use fixed overrides instead of reading `overrides_file` each cycle.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Overrides for the next cycle.
    pub fn overrides(&self) -> Result<ConfigOverrides, PluginError> {
        let overrides = match &self.overrides {
            Some(fixed) => fixed.clone(),
            None => ConfigOverrides::load(&self.settings.overrides_file)?,
        };
        Ok(overrides.disable(self.settings.disabled_plugins.iter().cloned()))
    }

    /// Run a full load cycle, replacing whatever the registry held.
    ///
    /// # Errors
    /// Returns a fatal [`PluginError`] (duplicate slug, missing dependency,
    /// cycle, unreadable overrides) when nothing may be activated. Failures
    /// of individual plugins are reported in [`LoadReport::failed`].
    pub async fn load_all(&mut self, db: &PgPool) -> Result<LoadOutcome, PluginError> {
        self.registry.clear();
        self.generation += 1;

        let mut report = LoadReport {
            generation: self.generation,
            started_at: Some(Utc::now()),
            ..LoadReport::default()
        };

        let overrides = self.overrides()?;
        let discovered = discover(&self.catalog)?;
        report.order = resolve_load_order(&discovered)?;
        info!(order = ?report.order, "resolved plugin load order");

        let mut app = Router::new();
        for slug in report.order.clone() {
            let Some(handle) = discovered.get(&slug) else {
                continue;
            };

            match self.activate(handle, &overrides, db, &app).await {
                Ok(Activation::Active(router)) => {
                    app = router;
                    info!(
                        plugin = %slug,
                        version = %handle.descriptor().version,
                        "loaded plugin"
                    );
                    report.active.push(slug);
                }
                Ok(Activation::Disabled) => {
                    info!(plugin = %slug, "skipping disabled plugin");
                    report.disabled.push(slug);
                }
                Err(e) => {
                    error!(
                        plugin = %slug,
                        module = %handle.module(),
                        error = %e,
                        "failed to load plugin"
                    );
                    report.failed.push(ActivationFailure {
                        slug,
                        module: handle.module().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            generation = report.generation,
            active = report.active.len(),
            disabled = report.disabled.len(),
            failed = report.failed.len(),
            routes = self.registry.routes().len(),
            "plugin load cycle complete"
        );

        Ok(LoadOutcome {
            report,
            router: app,
        })
    }

    /// Run `on_shutdown` for every active plugin, newest first, then empty
    /// the registry. Hook failures are logged and do not stop the sweep.
    pub async fn shutdown_all(&mut self, db: &PgPool) {
        let plugins = self.registry.list();
        for plugin in plugins.iter().rev() {
            let host = PluginHost::new(db, &self.registry);
            let slug = plugin.slug();
            match run_hook(slug, "on_shutdown", self.settings.hook_timeout, plugin.on_shutdown(&host))
                .await
            {
                Ok(()) => debug!(plugin = %slug, "plugin shut down"),
                Err(e) => warn!(plugin = %slug, error = %e, "plugin shutdown failed"),
            }
        }
        self.registry.clear();
    }

    /// Activate one plugin, rolling back its registry writes on failure.
    async fn activate(
        &mut self,
        handle: &PluginHandle,
        overrides: &ConfigOverrides,
        db: &PgPool,
        app: &Router,
    ) -> Result<Activation, PluginError> {
        let config = overrides.config_for(handle.descriptor())?;
        if !config.enabled {
            return Ok(Activation::Disabled);
        }

        let active: HashSet<String> = self.registry.slugs().into_iter().collect();
        check_dependencies(handle.descriptor(), &active)?;

        let plugin: Arc<dyn Plugin> = Arc::from(handle.instantiate(config)?);
        if plugin.slug() != handle.slug() {
            return Err(PluginError::InvalidDescriptor {
                module: handle.module().to_string(),
                details: format!(
                    "slug changed from '{}' to '{}' after configuration",
                    handle.slug(),
                    plugin.slug()
                ),
            });
        }

        // Visible to later plugins before its own routes are registered.
        self.registry.add(plugin.clone());

        match self.start(&plugin, db, app).await {
            Ok(router) => Ok(Activation::Active(router)),
            Err(e) => {
                let slug = handle.slug();
                self.registry.remove(slug);
                let released = self.registry.release_routes(slug);
                debug!(plugin = %slug, released, "rolled back plugin activation");
                Err(e)
            }
        }
    }

    /// Claim routes, register them live, then run the async hooks.
    async fn start(
        &mut self,
        plugin: &Arc<dyn Plugin>,
        db: &PgPool,
        app: &Router,
    ) -> Result<Router, PluginError> {
        let slug = plugin.slug().to_string();

        let mut dry_run = RouteRegistrar::dry_run();
        register_routes(plugin.as_ref(), &mut dry_run)?;
        for path in dry_run.paths() {
            self.registry.claim_route(path, &slug)?;
        }

        let mut live = RouteRegistrar::live();
        register_routes(plugin.as_ref(), &mut live)?;
        // A plugin may register differently once live; every path it serves
        // must still be owned by it.
        for path in live.paths() {
            self.registry.claim_route(path, &slug)?;
        }
        let staged = live.into_router();
        let router = catch_panic(|| app.clone().merge(staged)).map_err(|message| {
            PluginError::HookFailed {
                plugin: slug.clone(),
                hook: "register_routes",
                details: format!("router rejected routes: {message}"),
            }
        })?;

        let timeout = self.settings.hook_timeout;
        run_hook(&slug, "init_db", timeout, plugin.init_db(db)).await?;

        let host = PluginHost::new(db, &self.registry);
        if let Err(e) = run_hook(&slug, "on_startup", timeout, plugin.on_startup(&host)).await {
            if let Err(cleanup) =
                run_hook(&slug, "on_shutdown", timeout, plugin.on_shutdown(&host)).await
            {
                warn!(plugin = %slug, error = %cleanup, "cleanup after failed startup failed");
            }
            return Err(e);
        }

        Ok(router)
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("settings", &self.settings)
            .field("catalog", &self.catalog)
            .field("registry", &self.registry)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Call `register_routes`, turning a panic into an error.
fn register_routes(plugin: &dyn Plugin, routes: &mut RouteRegistrar) -> Result<(), PluginError> {
    catch_panic(|| plugin.register_routes(routes)).map_err(|message| PluginError::HookFailed {
        plugin: plugin.slug().to_string(),
        hook: "register_routes",
        details: format!("panicked: {message}"),
    })
}

/// Await a lifecycle hook under a timeout, turning a panic into an error.
async fn run_hook<F>(
    slug: &str,
    hook: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<(), PluginError>
where
    F: Future<Output = PluginResult>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(PluginError::hook_failed(slug, hook, &e)),
        Ok(Err(payload)) => Err(PluginError::HookFailed {
            plugin: slug.to_string(),
            hook,
            details: format!("panicked: {}", panic_message(payload)),
        }),
        Err(_) => Err(PluginError::HookTimeout {
            plugin: slug.to_string(),
            hook,
            timeout,
        }),
    }
}
