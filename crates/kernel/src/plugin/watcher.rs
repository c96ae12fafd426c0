//! Development hot reload.
//!
//! Polls modification times under the plugins directory, plus any extra files
//! such as the overrides file, and on any change asks a [`Reloader`] to tear everything down and load from scratch. There is
//! no incremental reload: the dependency graph is always rebuilt whole.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use super::error::PluginError;
use super::loader::LoaderSettings;

/// Something that can rebuild the plugin set.
#[async_trait]
pub trait Reloader: Send + Sync {
    async fn reload(&self) -> Result<(), PluginError>;
}

/// File path -> last modification time.
pub type FileSnapshot = HashMap<PathBuf, SystemTime>;

/// Record the modification time of every tracked file under `dir`.
///
/// An empty `extensions` list tracks every file. Unreadable entries are
/// ignored; a missing directory yields an empty snapshot.
pub fn scan(dir: &Path, extensions: &[String]) -> FileSnapshot {
    WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            extensions.is_empty()
                || e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| extensions.iter().any(|x| x == ext))
        })
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((e.into_path(), modified))
        })
        .collect()
}

/// Polling watcher over a plugins directory.
#[derive(Debug, Clone)]
pub struct HotReloadWatcher {
    dir: PathBuf,
    extensions: Vec<String>,
    /// Tracked regardless of location or extension.
    files: Vec<PathBuf>,
    interval: Duration,
}

impl HotReloadWatcher {
    pub fn new(dir: impl Into<PathBuf>, extensions: Vec<String>, interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            extensions,
            files: Vec::new(),
            interval,
        }
    }

    /// Watch the plugins directory and the overrides file, wherever it lives.
    pub fn from_settings(settings: &LoaderSettings) -> Self {
        Self::new(
            settings.plugins_dir.clone(),
            settings.watch_extensions.clone(),
            settings.reload_interval,
        )
        .with_file(settings.overrides_file.clone())
    }

    /// Also track one file outside the extension filter.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Current state of everything this watcher tracks.
    fn snapshot(&self) -> FileSnapshot {
        let mut snapshot = scan(&self.dir, &self.extensions);
        for path in &self.files {
            if let Ok(modified) = std::fs::metadata(path).and_then(|m| m.modified()) {
                snapshot.insert(path.clone(), modified);
            }
        }
        snapshot
    }

    /// Start polling in a background task.
    ///
    /// The baseline snapshot is taken before this returns, so any change
    /// made afterwards is detected.
    pub fn spawn(self, reloader: Arc<dyn Reloader>) -> WatcherHandle {
        let token = CancellationToken::new();
        let baseline = self.snapshot();
        info!(
            dir = %self.dir.display(),
            files = baseline.len(),
            interval_ms = self.interval.as_millis() as u64,
            "plugin hot reload enabled"
        );

        let task = tokio::spawn(self.run(baseline, reloader, token.clone()));
        WatcherHandle { token, task }
    }

    async fn run(self, mut snapshot: FileSnapshot, reloader: Arc<dyn Reloader>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = self.snapshot();
            if current == snapshot {
                continue;
            }
            snapshot = current;

            info!(dir = %self.dir.display(), "plugin change detected, reloading plugins");
            // Not raced against cancellation: a reload always runs to completion.
            if let Err(e) = reloader.reload().await {
                error!(error = %e, "plugin hot reload failed");
            }
        }

        debug!(dir = %self.dir.display(), "plugin watcher stopped");
    }
}

/// Handle to a running watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Ask the watcher to stop after any reload in progress.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop the watcher and wait for it to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "plugin watcher task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
