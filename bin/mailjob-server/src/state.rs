//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use mailjob_core::{AnyQueue, JobManager, ProgressGateway, SqliteStore};

use crate::config::Config;

pub type Jobs = JobManager<SqliteStore, AnyQueue>;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Job lifecycle API; also shared with the worker pool.
    pub jobs: Arc<Jobs>,
    /// Per-connection progress streams.
    pub gateway: ProgressGateway<SqliteStore, AnyQueue>,
}

impl AppState {
    pub fn new(config: Config, jobs: Arc<Jobs>) -> Self {
        let gateway = ProgressGateway::new(Arc::clone(&jobs), config.gateway_config());
        Self {
            config: Arc::new(config),
            jobs,
            gateway,
        }
    }
}

#[cfg(test)]
pub(crate) async fn test_state(config: Config) -> Arc<AppState> {
    use mailjob_core::{ManagerConfig, MemoryQueue, TaskRegistry};

    let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
    let jobs = Arc::new(JobManager::new(
        store,
        AnyQueue::Memory(MemoryQueue::new()),
        Arc::new(TaskRegistry::with_builtin()),
        ManagerConfig::default(),
    ));
    Arc::new(AppState::new(config, jobs))
}
