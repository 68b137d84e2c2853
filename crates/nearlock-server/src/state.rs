//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;

use nearlock_core::runtime::EngineHandle;
use nearlock_core::MonitorConfig;
use tokio::sync::RwLock;
use tracing::warn;

/// Shared application state.
///
/// The engine owns the live configuration; the copy held here is the
/// persisted view, updated alongside every engine request that changes a
/// configurable setting.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    engine: EngineHandle,
    config: RwLock<MonitorConfig>,
    config_path: PathBuf,
}

impl AppState {
    /// Creates application state around a running engine.
    pub fn new(engine: EngineHandle, config: MonitorConfig, config_path: PathBuf) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                engine,
                config: RwLock::new(config),
                config_path,
            }),
        }
    }

    /// Handle to the running engine.
    pub fn engine(&self) -> &EngineHandle {
        &self.inner.engine
    }

    /// Get read access to the persisted configuration.
    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, MonitorConfig> {
        self.inner.config.read().await
    }

    /// Get write access to the persisted configuration.
    pub async fn config_mut(&self) -> tokio::sync::RwLockWriteGuard<'_, MonitorConfig> {
        self.inner.config.write().await
    }

    /// Persists the current configuration to disk. A write failure is
    /// logged rather than surfaced: the engine already runs with the new
    /// settings and only the on-disk copy is stale.
    pub async fn persist_config(&self) {
        let config = self.inner.config.read().await;
        if let Err(err) = config.save(&self.inner.config_path) {
            warn!(path = %self.inner.config_path.display(), %err, "failed to persist configuration");
        }
    }
}
