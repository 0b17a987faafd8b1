//! Job Manager: the lifecycle API over the record store and the queue.
//!
//! Creating a job and scheduling it are separate steps ([`JobManager::create_job`]
//! then [`JobManager::enqueue_job`]); [`JobManager::submit`] does both. If
//! scheduling cannot succeed after retries the record is failed rather than
//! left `pending` with no queue entry, and [`JobManager::reconcile`] sweeps up
//! whatever still slips through (process restarts, crashed workers).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::{JobError, QueueError};
use crate::job::{Job, JobFilter, JobStats, JobType, JsonMap};
use crate::queue::{JobQueue, QueueEntry};
use crate::registry::TaskRegistry;
use crate::store::JobStore;

const SCHEDULE_FAILED_MESSAGE: &str = "the job could not be scheduled; please try again";
const STALE_MESSAGE: &str = "the job stopped responding and was abandoned; please try again";

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Enqueue attempts before a new job is marked failed.
    pub enqueue_retries: u32,
    /// First retry delay; doubles on every attempt.
    pub retry_base_delay: Duration,
    /// A `pending` job older than this is re-offered to the queue by `reconcile`.
    pub pending_grace: Duration,
    /// A `running` job with no write for this long is failed by `reconcile`.
    pub stale_after: Duration,
    /// Upper bound for `JobFilter::limit`.
    pub max_list_limit: usize,
    /// Page size when `reconcile` scans pending jobs.
    pub reconcile_batch: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            enqueue_retries: 3,
            retry_base_delay: Duration::from_millis(50),
            pending_grace: Duration::from_secs(30),
            stale_after: Duration::from_secs(35 * 60),
            max_list_limit: 500,
            reconcile_batch: 500,
        }
    }
}

/// What one [`JobManager::reconcile`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub requeued: usize,
    pub failed_stale: usize,
}

pub struct JobManager<S, Q> {
    store: S,
    queue: Q,
    registry: Arc<TaskRegistry>,
    config: ManagerConfig,
}

impl<S, Q> std::fmt::Debug for JobManager<S, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: JobStore, Q: JobQueue> JobManager<S, Q> {
    pub fn new(store: S, queue: Q, registry: Arc<TaskRegistry>, config: ManagerConfig) -> Self {
        Self {
            store,
            queue,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ── Creation & scheduling ─────────────────────────────────────────────────

    /// Validate and persist a new `pending` job. Nothing is enqueued.
    pub async fn create_job(
        &self,
        job_type: &str,
        metadata: JsonMap,
        owner_id: Option<&str>,
    ) -> Result<Job, JobError> {
        let job_type: JobType = job_type
            .parse()
            .map_err(|_| JobError::InvalidJobType(job_type.to_owned()))?;

        let body = self.registry.get(job_type).ok_or_else(|| {
            JobError::Validation(format!("job type '{job_type}' is not available on this server"))
        })?;
        body.validate(&metadata).map_err(JobError::Validation)?;

        let job = Job::new(job_type, metadata, owner_id.map(str::to_owned));
        self.store.insert_job(&job).await?;
        info!(job_id = %job.id, job_type = %job_type, owner = ?owner_id, "job created");
        Ok(job)
    }

    /// Offer a job to the queue, retrying with exponential backoff.
    ///
    /// When every attempt fails the record is moved to `failed` and
    /// [`JobError::QueueDelivery`] is returned.
    pub async fn enqueue_job(&self, job: &Job) -> Result<(), JobError> {
        let attempts = self.config.enqueue_retries.max(1);
        let mut delay = self.config.retry_base_delay;
        let mut attempt = 1;

        let last_error = loop {
            match self.queue.enqueue(QueueEntry::for_job(job)).await {
                Ok(admitted) => {
                    debug!(job_id = %job.id, admitted, attempt, "job enqueued");
                    return Ok(());
                }
                Err(QueueError::Closed) => break QueueError::Closed,
                Err(e) if attempt >= attempts => break e,
                Err(e) => {
                    warn!(job_id = %job.id, attempt, error = %e, "enqueue failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
            }
        };

        error!(job_id = %job.id, attempts = attempt, error = %last_error, "enqueue retries exhausted; failing job");
        self.store.fail_job(&job.id, SCHEDULE_FAILED_MESSAGE).await?;
        Err(JobError::QueueDelivery {
            id: job.id.clone(),
            source: last_error,
        })
    }

    /// Create and enqueue in one call.
    pub async fn submit(
        &self,
        job_type: &str,
        metadata: JsonMap,
        owner_id: Option<&str>,
    ) -> Result<Job, JobError> {
        let job = self.create_job(job_type, metadata, owner_id).await?;
        self.enqueue_job(&job).await?;
        Ok(job)
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, JobError> {
        Ok(self.store.get_job(id).await?)
    }

    /// Fetch a job on behalf of `user_id`. Jobs without an owner are denied.
    pub async fn get_job_for(&self, id: &str, user_id: &str) -> Result<Job, JobError> {
        let job = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| JobError::NotFound(id.to_owned()))?;
        if !job.is_owned_by(user_id) {
            warn!(job_id = %id, caller = %user_id, "ownership check failed");
            return Err(JobError::Forbidden);
        }
        Ok(job)
    }

    pub async fn list_jobs(&self, mut filter: JobFilter) -> Result<Vec<Job>, JobError> {
        filter.limit = filter.limit.clamp(1, self.config.max_list_limit);
        Ok(self.store.list_jobs(&filter).await?)
    }

    pub async fn job_stats(&self, user_id: Option<&str>) -> Result<JobStats, JobError> {
        Ok(self.store.job_stats(user_id).await?)
    }

    // ── Cancel & delete ───────────────────────────────────────────────────────

    /// Mark a job `cancelled` and withdraw it from the queue if still waiting.
    ///
    /// Already-terminal jobs are returned unchanged. A running worker notices
    /// the cancellation at its next checkpoint.
    pub async fn cancel_job(&self, id: &str) -> Result<Job, JobError> {
        let job = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| JobError::NotFound(id.to_owned()))?;
        if job.status.is_terminal() {
            debug!(job_id = %id, status = %job.status, "cancel on finished job is a no-op");
            return Ok(job);
        }

        if self.store.cancel_job(id).await? {
            info!(job_id = %id, previous = %job.status, "job cancelled");
            match self.queue.remove(id).await {
                Ok(removed) => debug!(job_id = %id, removed, "queue withdrawal"),
                Err(e) => warn!(job_id = %id, error = %e, "failed to withdraw cancelled job from queue"),
            }
        }

        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| JobError::NotFound(id.to_owned()))
    }

    pub async fn cancel_job_for(&self, id: &str, user_id: &str) -> Result<Job, JobError> {
        self.get_job_for(id, user_id).await?;
        self.cancel_job(id).await
    }

    /// Hard-delete a finished job. Live work is rejected with [`JobError::JobActive`].
    pub async fn delete_job(&self, id: &str) -> Result<(), JobError> {
        let job = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| JobError::NotFound(id.to_owned()))?;
        if !job.status.is_terminal() {
            return Err(JobError::JobActive {
                id: id.to_owned(),
                status: job.status,
            });
        }
        if !self.store.delete_job(id).await? {
            return Err(JobError::NotFound(id.to_owned()));
        }
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    pub async fn delete_job_for(&self, id: &str, user_id: &str) -> Result<(), JobError> {
        self.get_job_for(id, user_id).await?;
        self.delete_job(id).await
    }

    // ── Worker-facing transitions ─────────────────────────────────────────────

    /// Claim a job for execution. `false` means someone else won or it was cancelled.
    pub async fn mark_running(&self, id: &str) -> Result<bool, JobError> {
        Ok(self.store.mark_running(id).await?)
    }

    /// Record progress for a running job. `progress` is clamped to 0..=100.
    /// Returns `false` once the job is no longer running.
    pub async fn update_progress(
        &self,
        id: &str,
        progress: i64,
        metadata: Option<&JsonMap>,
        result_data: Option<&JsonMap>,
    ) -> Result<bool, JobError> {
        let progress = progress.clamp(0, 100) as u8;
        Ok(self
            .store
            .update_progress(id, progress, metadata, result_data)
            .await?)
    }

    pub async fn complete_job(
        &self,
        id: &str,
        result_data: Option<&JsonMap>,
    ) -> Result<bool, JobError> {
        Ok(self.store.complete_job(id, result_data).await?)
    }

    pub async fn fail_job(&self, id: &str, error_message: &str) -> Result<bool, JobError> {
        Ok(self.store.fail_job(id, error_message).await?)
    }

    // ── Recovery ──────────────────────────────────────────────────────────────

    /// Re-offer old `pending` jobs to the queue and fail `running` jobs whose
    /// worker has gone quiet.
    ///
    /// Re-offering is safe: enqueue ignores ids that are still waiting, and a
    /// second delivery of an id loses the `pending -> running` swap.
    pub async fn reconcile(&self) -> Result<ReconcileReport, JobError> {
        let now = Utc::now();
        let mut report = ReconcileReport::default();

        // Page through every old pending job, not just the oldest page.
        let pending_cutoff = now - to_chrono(self.config.pending_grace);
        let page = self.config.reconcile_batch.max(1);
        let mut cursor = None;
        loop {
            let pending = self
                .store
                .pending_before(pending_cutoff, cursor.take(), page)
                .await?;
            for job in &pending {
                match self.queue.enqueue(QueueEntry::for_job(job)).await {
                    Ok(true) => {
                        warn!(job_id = %job.id, "re-enqueued pending job with no queue entry");
                        report.requeued += 1;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(job_id = %job.id, error = %e, "failed to re-enqueue pending job"),
                }
            }
            match pending.last() {
                Some(last) if pending.len() == page => {
                    cursor = Some((last.created_at, last.id.clone()));
                }
                _ => break,
            }
        }

        let stale_cutoff = now - to_chrono(self.config.stale_after);
        let stale = self
            .store
            .fail_stale_running(stale_cutoff, STALE_MESSAGE)
            .await?;
        for id in &stale {
            warn!(job_id = %id, "failed stale running job");
        }
        report.failed_stale = stale.len();

        if report != ReconcileReport::default() {
            info!(requeued = report.requeued, failed_stale = report.failed_stale, "reconcile pass");
        }
        Ok(report)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
