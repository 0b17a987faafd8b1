use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{JobError, TaskError};
use crate::job::{JobId, JobStatus, JobType, JsonMap};
use crate::manager::JobManager;
use crate::queue::JobQueue;
use crate::store::JobStore;

/// Where a running task reports progress.
///
/// Object-safe so [`JobContext`] (and with it [`crate::registry::TaskBody`])
/// stays free of the store/queue type parameters.
#[async_trait]
pub trait ProgressSink: Send + Sync + 'static {
    /// Returns `false` once the job has left `running`.
    async fn write_progress(
        &self,
        id: &str,
        progress: u8,
        metadata: Option<&JsonMap>,
        result_data: Option<&JsonMap>,
    ) -> Result<bool, JobError>;

    async fn current_status(&self, id: &str) -> Result<Option<JobStatus>, JobError>;
}

#[async_trait]
impl<S: JobStore, Q: JobQueue> ProgressSink for JobManager<S, Q> {
    async fn write_progress(
        &self,
        id: &str,
        progress: u8,
        metadata: Option<&JsonMap>,
        result_data: Option<&JsonMap>,
    ) -> Result<bool, JobError> {
        self.update_progress(id, i64::from(progress), metadata, result_data)
            .await
    }

    async fn current_status(&self, id: &str) -> Result<Option<JobStatus>, JobError> {
        Ok(self.get_job(id).await?.map(|job| job.status))
    }
}

/// Handle a task body uses to report progress and observe cancellation.
///
/// Cancellation is cooperative: nothing interrupts a body between
/// checkpoints, so bodies should checkpoint at least once per batch.
pub struct JobContext {
    job_id: JobId,
    job_type: JobType,
    sink: Arc<dyn ProgressSink>,
    timeout: Duration,
    deadline: Instant,
    progress: u8,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("job_type", &self.job_type)
            .field("progress", &self.progress)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        job_type: JobType,
        sink: Arc<dyn ProgressSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            job_id,
            job_type,
            sink,
            timeout,
            deadline: Instant::now() + timeout,
            progress: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Last progress value that was accepted by the store.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Persist progress and check that the job should keep going.
    ///
    /// `progress` never moves backwards: values below the last accepted one
    /// are raised to it. `metadata` and `result_data` replace the stored maps
    /// when given. Returns [`TaskError::Cancelled`] once the job has been
    /// cancelled and [`TaskError::TimedOut`] past the deadline; the body
    /// should return that error as-is.
    pub async fn checkpoint(
        &mut self,
        progress: u8,
        metadata: Option<&JsonMap>,
        result_data: Option<&JsonMap>,
    ) -> Result<(), TaskError> {
        self.check_deadline()?;
        let progress = progress.min(100).max(self.progress);

        if self
            .sink
            .write_progress(&self.job_id, progress, metadata, result_data)
            .await?
        {
            self.progress = progress;
            debug!(job_id = %self.job_id, progress, "checkpoint");
            return Ok(());
        }

        let status = self.sink.current_status(&self.job_id).await?;
        Err(interruption(status))
    }

    /// Like [`Self::checkpoint`] but writes nothing.
    pub async fn ensure_active(&self) -> Result<(), TaskError> {
        self.check_deadline()?;
        match self.sink.current_status(&self.job_id).await? {
            Some(JobStatus::Running) => Ok(()),
            other => Err(interruption(other)),
        }
    }

    fn check_deadline(&self) -> Result<(), TaskError> {
        if Instant::now() >= self.deadline {
            return Err(TaskError::TimedOut(self.timeout.as_secs()));
        }
        Ok(())
    }
}

fn interruption(status: Option<JobStatus>) -> TaskError {
    match status {
        // A running job cannot be deleted; a missing row means it was
        // cancelled and then removed.
        None | Some(JobStatus::Cancelled) => TaskError::Cancelled,
        Some(other) => TaskError::Interrupted(other),
    }
}
