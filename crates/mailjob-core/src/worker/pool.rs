use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{Worker, WorkerConfig};
use crate::manager::JobManager;
use crate::queue::JobQueue;
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub worker: WorkerConfig,
    /// Period of the [`JobManager::reconcile`] sweep. `None` disables it.
    pub reconcile_interval: Option<Duration>,
}

impl PoolConfig {
    /// Upper bound on workers in one pool.
    pub const MAX_WORKERS: usize = 1024;

    /// `workers` clamped to `1..=MAX_WORKERS`.
    pub fn worker_count(&self) -> usize {
        self.workers.clamp(1, Self::MAX_WORKERS)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            worker: WorkerConfig::default(),
            reconcile_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// A set of workers sharing one queue, plus the periodic reconcile sweep.
#[derive(Debug)]
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<S: JobStore, Q: JobQueue>(
        manager: Arc<JobManager<S, Q>>,
        config: PoolConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = config.worker_count();
        let mut handles = Vec::with_capacity(workers + 1);

        for id in 0..workers {
            let worker = Worker::new(id, Arc::clone(&manager), config.worker.clone());
            handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
        }

        if let Some(period) = config.reconcile_interval {
            handles.push(tokio::spawn(reconcile_loop(
                Arc::clone(&manager),
                period,
                shutdown_rx,
            )));
        }

        info!(workers, "worker pool started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Signal every worker to stop and wait up to `grace` for in-flight jobs.
    ///
    /// Tasks still running after `grace` are aborted; their jobs stay
    /// `running` until the next reconcile pass fails them as stale.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();

        let joined = tokio::time::timeout(grace, futures::future::join_all(self.handles)).await;
        match joined {
            Ok(results) => {
                for res in results {
                    if let Err(e) = res {
                        error!(error = %e, "worker task ended abnormally");
                    }
                }
                info!("worker pool stopped");
            }
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "workers still busy after grace period; aborting");
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

async fn reconcile_loop<S: JobStore, Q: JobQueue>(
    manager: Arc<JobManager<S, Q>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Err(e) = manager.reconcile().await {
                    error!(error = %e, "reconcile pass failed");
                }
            }
        }
    }
}
