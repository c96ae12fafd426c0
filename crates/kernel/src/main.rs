//! Marketplace Kernel
//!
//! HTTP server, plugin loader, and plugin inspection commands.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use marketplace_kernel::config::{self, Config};
use marketplace_kernel::plugin::{self, HotReloadWatcher, PluginLoader};
use marketplace_kernel::routes;
use marketplace_kernel::state::AppState;

/// Marketplace backend.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,

    /// Inspect plugins without starting the server.
    Plugin {
        #[command(subcommand)]
        command: PluginCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PluginCommand {
    /// List discovered plugins and whether they are enabled.
    List,

    /// Print the resolved activation order.
    Order,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Plugin { command } => run_plugin_command(command),
    }
}

fn run_plugin_command(command: PluginCommand) -> Result<()> {
    let settings = config::loader_settings_from_env().context("failed to load configuration")?;
    let loader = PluginLoader::new(settings, plugin::builtin());

    match command {
        PluginCommand::List => {
            let overrides = loader
                .overrides()
                .context("failed to read plugin overrides")?;
            plugin::cli::cmd_plugin_list(loader.catalog(), &overrides)
        }
        PluginCommand::Order => plugin::cli::cmd_plugin_order(loader.catalog()),
    }
}

async fn serve() -> Result<()> {
    info!("Starting marketplace kernel");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(port = config.port, "Configuration loaded");

    let state = AppState::new(&config, plugin::builtin())
        .await
        .context("failed to initialize application state")?;

    let snapshot = state
        .plugins()
        .load()
        .await
        .context("failed to load plugins")?;
    info!(
        active = snapshot.plugins.len(),
        disabled = snapshot.report.disabled.len(),
        failed = snapshot.report.failed.len(),
        routes = snapshot.routes.len(),
        "Plugins loaded"
    );

    let watcher = config.plugins.hot_reload.then(|| {
        HotReloadWatcher::from_settings(&config.plugins).spawn(state.plugins().clone())
    });

    let app = routes::app(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    state.plugins().shutdown().await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
