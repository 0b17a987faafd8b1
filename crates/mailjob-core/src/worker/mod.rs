//! Worker: takes entries off the queue and drives each job to a terminal state.
//!
//! For every delivered entry the worker re-reads the record, claims it with
//! the `pending -> running` swap (losing the swap means the job was
//! cancelled or claimed elsewhere, and the entry is dropped), then runs the
//! registered [`TaskBody`](crate::registry::TaskBody) under a wall-clock
//! timeout. Panics in a body are caught and recorded as a failure.

mod context;
mod pool;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::{QueueError, TaskError};
use crate::job::{JobId, JobStatus, JsonMap};
use crate::manager::JobManager;
use crate::queue::{JobQueue, QueueEntry};
use crate::store::JobStore;

pub use context::{JobContext, ProgressSink};
pub use pool::{PoolConfig, WorkerPool};

const PANIC_MESSAGE: &str = "task body panicked";
const INTERNAL_MESSAGE: &str = "internal error while running the job";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum wall-clock time a single job may run.
    pub job_timeout: Duration,
    /// Pause after a queue error before dequeuing again.
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(30 * 60),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// What happened to one delivered queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Record missing, not pending, or claimed by someone else. Nothing ran.
    Skipped,
    Completed,
    Failed,
    TimedOut,
    /// The body stopped at a checkpoint because the job left `running`
    /// (normally a cancellation).
    Stopped,
}

pub struct Worker<S, Q> {
    id: usize,
    manager: Arc<JobManager<S, Q>>,
    config: WorkerConfig,
}

impl<S: JobStore, Q: JobQueue> Worker<S, Q> {
    pub fn new(id: usize, manager: Arc<JobManager<S, Q>>, config: WorkerConfig) -> Self {
        Self {
            id,
            manager,
            config,
        }
    }

    /// Dequeue and process until `shutdown` flips or the queue is closed.
    ///
    /// A job already in progress is finished before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = self.id, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let entry = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                res = self.manager.queue().dequeue() => match res {
                    Ok(entry) => entry,
                    Err(QueueError::Closed) => break,
                    Err(e) => {
                        error!(worker_id = self.id, error = %e, "dequeue failed");
                        tokio::time::sleep(self.config.error_backoff).await;
                        continue;
                    }
                },
            };
            self.process(entry).await;
        }
        info!(worker_id = self.id, "worker stopped");
    }

    /// Run one delivered entry to completion.
    pub async fn process(&self, entry: QueueEntry) -> ProcessOutcome {
        let span = info_span!(
            "job",
            job_id = %entry.job_id,
            job_type = %entry.job_type,
            worker_id = self.id,
        );
        self.process_inner(entry).instrument(span).await
    }

    async fn process_inner(&self, entry: QueueEntry) -> ProcessOutcome {
        let job = match self.manager.get_job(&entry.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!("job record gone; dropping queue entry");
                return ProcessOutcome::Skipped;
            }
            Err(e) => {
                error!(error = %e, "failed to load job record");
                return ProcessOutcome::Skipped;
            }
        };
        if job.status != JobStatus::Pending {
            debug!(status = %job.status, "job is not pending; dropping queue entry");
            return ProcessOutcome::Skipped;
        }

        let Some(body) = self.manager.registry().get(job.job_type) else {
            warn!("no task body registered");
            let msg = format!("job type '{}' is not available on this server", job.job_type);
            return self.fail(&job.id, &msg, ProcessOutcome::Failed).await;
        };

        match self.manager.mark_running(&job.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("lost the claim; job was cancelled or taken by another worker");
                return ProcessOutcome::Skipped;
            }
            Err(e) => {
                error!(error = %e, "failed to claim job");
                return ProcessOutcome::Skipped;
            }
        }
        info!("job started");

        let timeout = self.config.job_timeout;
        let sink: Arc<dyn ProgressSink> = self.manager.clone();
        let mut ctx = JobContext::new(job.id.clone(), job.job_type, sink, timeout);

        let run = AssertUnwindSafe(body.run(job.metadata, &mut ctx)).catch_unwind();
        let outcome = match tokio::time::timeout(timeout, run).await {
            Err(_) => Err(TaskError::TimedOut(timeout.as_secs())),
            Ok(Err(_panic)) => {
                error!("task body panicked");
                Err(TaskError::failed(PANIC_MESSAGE))
            }
            Ok(Ok(res)) => res,
        };

        self.finish(&job.id, outcome).await
    }

    async fn finish(&self, id: &JobId, outcome: Result<JsonMap, TaskError>) -> ProcessOutcome {
        match outcome {
            Ok(result) => match self.manager.complete_job(id, Some(&result)).await {
                Ok(true) => {
                    info!("job completed");
                    ProcessOutcome::Completed
                }
                Ok(false) => {
                    info!("job left running before it finished; result discarded");
                    ProcessOutcome::Stopped
                }
                Err(e) => {
                    error!(error = %e, "failed to record completion");
                    self.fail(id, INTERNAL_MESSAGE, ProcessOutcome::Failed).await
                }
            },
            Err(TaskError::Cancelled) => {
                info!("job cancelled; stopped at checkpoint");
                ProcessOutcome::Stopped
            }
            Err(TaskError::Interrupted(status)) => {
                info!(%status, "job no longer running; stopped at checkpoint");
                ProcessOutcome::Stopped
            }
            Err(e @ TaskError::TimedOut(_)) => {
                warn!("job timed out");
                self.fail(id, &e.to_string(), ProcessOutcome::TimedOut).await
            }
            Err(TaskError::Failed(msg)) => {
                warn!(error = %msg, "job failed");
                self.fail(id, &msg, ProcessOutcome::Failed).await
            }
            Err(TaskError::Store(e)) => {
                error!(error = %e, "store error while running job");
                self.fail(id, INTERNAL_MESSAGE, ProcessOutcome::Failed).await
            }
        }
    }

    async fn fail(&self, id: &str, message: &str, outcome: ProcessOutcome) -> ProcessOutcome {
        match self.manager.fail_job(id, message).await {
            Ok(true) => outcome,
            // Cancelled (or otherwise finished) first; that state stands.
            Ok(false) => ProcessOutcome::Stopped,
            Err(e) => {
                error!(error = %e, "failed to record job failure");
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobType;
    use crate::manager::ManagerConfig;
    use crate::queue::MemoryQueue;
    use crate::registry::{TaskBody, TaskRegistry};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use tracing_test::traced_test;

    struct Panics;

    #[async_trait]
    impl TaskBody for Panics {
        async fn run(&self, _m: JsonMap, _ctx: &mut JobContext) -> Result<JsonMap, TaskError> {
            panic!("boom");
        }
    }

    struct Sleeps;

    #[async_trait]
    impl TaskBody for Sleeps {
        async fn run(&self, _m: JsonMap, _ctx: &mut JobContext) -> Result<JsonMap, TaskError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(JsonMap::new())
        }
    }

    struct Refuses;

    #[async_trait]
    impl TaskBody for Refuses {
        async fn run(&self, _m: JsonMap, _ctx: &mut JobContext) -> Result<JsonMap, TaskError> {
            Err(TaskError::failed("mailbox provider refused the batch"))
        }
    }

    async fn worker_with(
        job_type: JobType,
        body: impl TaskBody,
        timeout: Duration,
    ) -> Worker<SqliteStore, MemoryQueue> {
        let mut registry = TaskRegistry::new();
        registry.register(job_type, body);
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let manager = Arc::new(JobManager::new(
            store,
            MemoryQueue::new(),
            Arc::new(registry),
            ManagerConfig::default(),
        ));
        Worker::new(
            0,
            manager,
            WorkerConfig {
                job_timeout: timeout,
                ..WorkerConfig::default()
            },
        )
    }

    async fn submit_and_take(w: &Worker<SqliteStore, MemoryQueue>, t: JobType) -> QueueEntry {
        w.manager.submit(t.as_ref(), JsonMap::new(), Some("u1")).await.unwrap();
        w.manager.queue().try_dequeue().await.unwrap().unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn panic_is_recorded_as_failure() {
        let w = worker_with(JobType::SendEmails, Panics, Duration::from_secs(5)).await;
        let entry = submit_and_take(&w, JobType::SendEmails).await;
        assert_eq!(w.process(entry.clone()).await, ProcessOutcome::Failed);

        let job = w.manager.get_job(&entry.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(PANIC_MESSAGE));
        assert!(logs_contain("task body panicked"));
    }

    #[tokio::test]
    async fn timeout_fails_the_job() {
        let w = worker_with(JobType::SendEmails, Sleeps, Duration::from_millis(20)).await;
        let entry = submit_and_take(&w, JobType::SendEmails).await;
        assert_eq!(w.process(entry.clone()).await, ProcessOutcome::TimedOut);

        let job = w.manager.get_job(&entry.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("maximum execution time"));
    }

    #[tokio::test]
    async fn body_error_message_is_user_visible() {
        let w = worker_with(JobType::SendEmails, Refuses, Duration::from_secs(5)).await;
        let entry = submit_and_take(&w, JobType::SendEmails).await;
        assert_eq!(w.process(entry.clone()).await, ProcessOutcome::Failed);

        let job = w.manager.get_job(&entry.job_id).await.unwrap().unwrap();
        assert_eq!(job.error_message.as_deref(), Some("mailbox provider refused the batch"));
    }

    #[tokio::test]
    async fn redelivered_entry_is_skipped() {
        let w = worker_with(JobType::SendEmails, Refuses, Duration::from_secs(5)).await;
        let entry = submit_and_take(&w, JobType::SendEmails).await;
        w.process(entry.clone()).await;
        assert_eq!(w.process(entry).await, ProcessOutcome::Skipped);
    }

    #[tokio::test]
    async fn shutdown_stops_idle_worker() {
        let w = worker_with(JobType::SendEmails, Refuses, Duration::from_secs(5)).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(w.run(rx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
