//! Queue Adapter.
//!
//! Delivers "job is ready to run" signals to workers, independently of the
//! job record store. Implementations guarantee:
//!
//! - `enqueue` is idempotent while the id is still waiting: a duplicate does
//!   not create a second entry.
//! - each entry is handed to exactly one `dequeue`/`try_dequeue` caller, even
//!   with many concurrent consumers.
//! - `remove` is best-effort; an id that is not waiting is not an error.
//!
//! A job re-enqueued after it was already delivered may be delivered again;
//! the worker's `pending -> running` compare-and-swap makes that harmless.

pub mod memory;
pub mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::job::{Job, JobId, JobType, JsonMap};

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

/// A reference to a job waiting for a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub job_id: JobId,
    pub job_type: JobType,
    pub payload: JsonMap,
    pub owner_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type,
            payload: job.metadata.clone(),
            owner_id: job.user_id.clone(),
            enqueued_at: Utc::now(),
        }
    }
}

pub trait JobQueue: Send + Sync + 'static {
    /// Admit an entry. Returns `false` when the id is already waiting.
    fn enqueue(&self, entry: QueueEntry)
    -> impl Future<Output = Result<bool, QueueError>> + Send;

    /// Wait for the next entry. Returns [`QueueError::Closed`] after [`Self::close`].
    fn dequeue(&self) -> impl Future<Output = Result<QueueEntry, QueueError>> + Send;

    /// Take the next entry if one is ready, without waiting.
    fn try_dequeue(&self) -> impl Future<Output = Result<Option<QueueEntry>, QueueError>> + Send;

    /// Withdraw a waiting entry. Returns whether something was removed.
    fn remove(&self, job_id: &str) -> impl Future<Output = Result<bool, QueueError>> + Send;

    fn contains(&self, job_id: &str) -> impl Future<Output = Result<bool, QueueError>> + Send;

    fn len(&self) -> impl Future<Output = Result<usize, QueueError>> + Send;

    /// Wake every waiting consumer with [`QueueError::Closed`] and refuse
    /// further enqueues and dequeues.
    fn close(&self);
}

/// Queue backend chosen at startup.
#[derive(Debug)]
pub enum AnyQueue {
    Memory(MemoryQueue),
    Sqlite(SqliteQueue),
}

impl JobQueue for AnyQueue {
    async fn enqueue(&self, entry: QueueEntry) -> Result<bool, QueueError> {
        match self {
            AnyQueue::Memory(q) => q.enqueue(entry).await,
            AnyQueue::Sqlite(q) => q.enqueue(entry).await,
        }
    }

    async fn dequeue(&self) -> Result<QueueEntry, QueueError> {
        match self {
            AnyQueue::Memory(q) => q.dequeue().await,
            AnyQueue::Sqlite(q) => q.dequeue().await,
        }
    }

    async fn try_dequeue(&self) -> Result<Option<QueueEntry>, QueueError> {
        match self {
            AnyQueue::Memory(q) => q.try_dequeue().await,
            AnyQueue::Sqlite(q) => q.try_dequeue().await,
        }
    }

    async fn remove(&self, job_id: &str) -> Result<bool, QueueError> {
        match self {
            AnyQueue::Memory(q) => q.remove(job_id).await,
            AnyQueue::Sqlite(q) => q.remove(job_id).await,
        }
    }

    async fn contains(&self, job_id: &str) -> Result<bool, QueueError> {
        match self {
            AnyQueue::Memory(q) => q.contains(job_id).await,
            AnyQueue::Sqlite(q) => q.contains(job_id).await,
        }
    }

    async fn len(&self) -> Result<usize, QueueError> {
        match self {
            AnyQueue::Memory(q) => q.len().await,
            AnyQueue::Sqlite(q) => q.len().await,
        }
    }

    fn close(&self) {
        match self {
            AnyQueue::Memory(q) => q.close(),
            AnyQueue::Sqlite(q) => q.close(),
        }
    }
}
