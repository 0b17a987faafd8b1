//! Error taxonomy for the job core.
//!
//! [`JobError`] is what callers of the lifecycle API see. [`QueueError`] and
//! [`TaskError`] stay closer to their components and are folded into
//! `JobError` (or into a `failed` job record) at the manager/worker seam.

use thiserror::Error;

use crate::job::{JobId, JobStatus};

/// Errors returned by [`crate::manager::JobManager`].
#[derive(Debug, Error)]
pub enum JobError {
    /// The requested type is not part of the closed job type enumeration.
    #[error("invalid job type: {0}")]
    InvalidJobType(String),

    /// Bad input shape or out-of-range parameter; the job was not created.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Ownership mismatch. Deliberately carries no job details.
    #[error("access to job denied")]
    Forbidden,

    /// Attempted to delete live work.
    #[error("job {id} is {status}; only finished jobs can be deleted")]
    JobActive { id: JobId, status: JobStatus },

    /// Enqueue retries exhausted; the job record has been marked failed.
    #[error("could not schedule job {id}: {source}")]
    QueueDelivery {
        id: JobId,
        #[source]
        source: QueueError,
    },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors produced by a [`crate::queue::JobQueue`] implementation.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue has been closed for shutdown.
    #[error("queue closed")]
    Closed,

    #[error("queue store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("queue payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a task body that did not complete normally.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The job was cancelled; observed at a checkpoint.
    #[error("job cancelled")]
    Cancelled,

    /// The record left `running` by some other route (e.g. the stale sweep).
    #[error("job is no longer running (status: {0})")]
    Interrupted(JobStatus),

    /// The job exceeded its wall-clock ceiling.
    #[error("job exceeded its maximum execution time of {0}s")]
    TimedOut(u64),

    /// The task body failed. The message is user-visible.
    #[error("{0}")]
    Failed(String),

    #[error("store error: {0}")]
    Store(#[from] JobError),
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }
}
