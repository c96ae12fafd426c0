//! Plugin runtime.
//!
//! Owns the loader and publishes an immutable [`PluginSnapshot`] after every
//! load cycle. Request handlers read the snapshot without waiting on the
//! loader; load, reload and shutdown are serialized behind one async mutex so
//! cycles never overlap.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use marketplace_sdk::PluginMetadata;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::error::PluginError;
use super::loader::{LoadReport, PluginLoader};
use super::watcher::Reloader;

/// Published result of the most recent load cycle.
#[derive(Clone, Serialize)]
pub struct PluginSnapshot {
    /// Active plugins in activation order.
    pub plugins: Vec<PluginMetadata>,
    /// Route path -> owning slug.
    pub routes: BTreeMap<String, String>,
    pub report: LoadReport,
    /// Fatal error that aborted the last cycle, if any.
    pub last_error: Option<String>,
    #[serde(skip)]
    router: Router,
}

impl PluginSnapshot {
    /// Snapshot with nothing active.
    pub fn empty() -> Self {
        Self {
            plugins: Vec::new(),
            routes: BTreeMap::new(),
            report: LoadReport::default(),
            last_error: None,
            router: Router::new(),
        }
    }

    /// Live router serving every active plugin.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn get(&self, slug: &str) -> Option<&PluginMetadata> {
        self.plugins.iter().find(|p| p.slug == slug)
    }

    pub fn is_active(&self, slug: &str) -> bool {
        self.get(slug).is_some()
    }
}

impl std::fmt::Debug for PluginSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSnapshot")
            .field("plugins", &self.plugins.iter().map(|p| &p.slug).collect::<Vec<_>>())
            .field("routes", &self.routes)
            .field("report", &self.report)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

/// Loader plus published snapshot.
///
/// Every cycle runs on a task of its own, so dropping the caller's future
/// (a disconnected admin request, say) never leaves a reload half done.
pub struct PluginRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    db: PgPool,
    loader: Mutex<PluginLoader>,
    snapshot: parking_lot::RwLock<Arc<PluginSnapshot>>,
}

impl PluginRuntime {
    pub fn new(loader: PluginLoader, db: PgPool) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                db,
                loader: Mutex::new(loader),
                snapshot: parking_lot::RwLock::new(Arc::new(PluginSnapshot::empty())),
            }),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<PluginSnapshot> {
        self.inner.snapshot.read().clone()
    }

    /// Run a load cycle and publish its result.
    ///
    /// On a fatal error an empty snapshot carrying the error is published and
    /// the error is returned.
    pub async fn load(&self) -> Result<Arc<PluginSnapshot>, PluginError> {
        let inner = self.inner.clone();
        join_cycle(tokio::spawn(async move { inner.load().await })).await
    }

    /// Shut every active plugin down and load from scratch, as one unit of
    /// work with respect to other loads, reloads and shutdowns.
    pub async fn reload(&self) -> Result<Arc<PluginSnapshot>, PluginError> {
        let inner = self.inner.clone();
        join_cycle(tokio::spawn(async move { inner.reload().await })).await
    }

    /// Shut every active plugin down and publish an empty snapshot.
    pub async fn shutdown(&self) {
        let inner = self.inner.clone();
        if let Err(e) = tokio::spawn(async move { inner.shutdown().await }).await {
            error!(error = %e, "plugin shutdown task failed");
        }
    }
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl RuntimeInner {
    async fn load(&self) -> Result<Arc<PluginSnapshot>, PluginError> {
        let mut loader = self.loader.lock().await;
        self.load_locked(&mut loader).await
    }

    async fn reload(&self) -> Result<Arc<PluginSnapshot>, PluginError> {
        let mut loader = self.loader.lock().await;
        info!("reloading plugins");
        loader.shutdown_all(&self.db).await;
        self.publish(PluginSnapshot::empty());
        self.load_locked(&mut loader).await
    }

    async fn shutdown(&self) {
        let mut loader = self.loader.lock().await;
        loader.shutdown_all(&self.db).await;
        self.publish(PluginSnapshot::empty());
        info!("all plugins shut down");
    }

    async fn load_locked(&self, loader: &mut PluginLoader) -> Result<Arc<PluginSnapshot>, PluginError> {
        match loader.load_all(&self.db).await {
            Ok(outcome) => {
                let registry = loader.registry();
                let snapshot = PluginSnapshot {
                    plugins: registry.list().iter().map(|p| p.metadata()).collect(),
                    routes: registry.routes(),
                    report: outcome.report,
                    last_error: None,
                    router: outcome.router,
                };
                Ok(self.publish(snapshot))
            }
            Err(e) => Err(self.publish_failure(e)),
        }
    }

    fn publish_failure(&self, e: PluginError) -> PluginError {
        error!(error = %e, "plugin load cycle aborted, no plugins activated");
        self.publish(PluginSnapshot {
            last_error: Some(e.to_string()),
            ..PluginSnapshot::empty()
        });
        e
    }

    fn publish(&self, snapshot: PluginSnapshot) -> Arc<PluginSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write() = snapshot.clone();
        snapshot
    }
}

/// Wait for a cycle task. A task that panicked or was cancelled becomes a
/// fatal error.
async fn join_cycle(
    task: JoinHandle<Result<Arc<PluginSnapshot>, PluginError>>,
) -> Result<Arc<PluginSnapshot>, PluginError> {
    task.await.unwrap_or_else(|e| {
        Err(PluginError::CycleAborted {
            details: e.to_string(),
        })
    })
}

#[async_trait]
impl Reloader for PluginRuntime {
    async fn reload(&self) -> Result<(), PluginError> {
        PluginRuntime::reload(self).await.map(|_| ())
    }
}
