//! Application state shared by the command handlers.
//!
//! Wires the configured job store, the flow registry, the in-process
//! execution engine and the cron manager together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{Settings, StoreBackend};
use crate::cron::{CronManager, JobStore, build_store};
use crate::db::{AsyncDbPool, establish_async_connection_pool, run_pending_migrations};
use crate::error::AppResult;
use crate::flows::{FlowCompletion, FlowRegistry, LocalFlowEngine};

/// Everything a command needs to act on jobs.
///
/// Cloning is cheap; every member is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CronManager>,
    pub engine: Arc<LocalFlowEngine>,
    pub registry: Arc<FlowRegistry>,
    pub store: Arc<dyn JobStore>,
    /// Present only for the postgres backend
    pub db_pool: Option<AsyncDbPool>,
}

impl AppState {
    /// Build the state from settings.
    ///
    /// Returns the receiving end of the engine's completion events; hand it
    /// to `spawn_completion_listener` so finished runs are recorded.
    pub async fn build(
        settings: &Settings,
    ) -> AppResult<(Self, mpsc::UnboundedReceiver<FlowCompletion>)> {
        let db_pool = match settings.store.backend {
            StoreBackend::Memory => None,
            StoreBackend::Postgres => {
                if settings.database.auto_migrate {
                    let applied = run_pending_migrations(&settings.database.url).await?;
                    if !applied.is_empty() {
                        tracing::info!(count = applied.len(), "Applied pending migrations");
                    }
                }
                Some(establish_async_connection_pool(&settings.database).await?)
            }
        };

        let store = build_store(&settings.store, db_pool.clone())?;
        Ok(Self::from_store(store, db_pool, settings))
    }

    /// Build the state around an existing store.
    pub fn from_store(
        store: Arc<dyn JobStore>,
        db_pool: Option<AsyncDbPool>,
        settings: &Settings,
    ) -> (Self, mpsc::UnboundedReceiver<FlowCompletion>) {
        let registry = Arc::new(FlowRegistry::with_builtin_flows());
        let (engine, completions) = LocalFlowEngine::new(Arc::clone(&registry), Arc::clone(&store));
        let engine = Arc::new(engine);

        let manager = Arc::new(CronManager::new(
            Arc::clone(&store),
            engine.clone(),
            registry.clone(),
            &settings.scheduler,
        ));

        tracing::debug!(
            backend = ?settings.store.backend,
            flows = ?registry.flow_names(),
            "Application state initialized"
        );

        let state = Self {
            manager,
            engine,
            registry,
            store,
            db_pool,
        };
        (state, completions)
    }

    /// Wait for in-flight flows, then cancel whatever is left.
    pub async fn drain(&self, grace: Duration) {
        if !self.engine.wait_idle(grace).await {
            tracing::warn!(
                outstanding = self.engine.outstanding_count(),
                "Flows still running after grace period; cancelling"
            );
            self.engine.shutdown();
            self.engine.wait_idle(grace).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_with_memory_backend() {
        let settings = Settings::default();
        let (state, _completions) = AppState::build(&settings).await.unwrap();

        assert!(state.db_pool.is_none());
        assert!(state.registry.flow_names().contains(&"noop".to_string()));
        let (jobs, total) = state.manager.list_jobs(0, 0).await.unwrap();
        assert!(jobs.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_drain_when_idle_returns_immediately() {
        let (state, _completions) = AppState::build(&Settings::default()).await.unwrap();
        state.drain(Duration::from_millis(10)).await;
        assert_eq!(state.engine.outstanding_count(), 0);
    }
}
