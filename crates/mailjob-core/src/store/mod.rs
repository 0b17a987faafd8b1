//! Job Record Store.
//!
//! [`JobStore`] is the durable source of truth for job state. Every status
//! change is a single conditional write ("move to Y only if the current
//! status is still X"), so the return value of each mutating method tells the
//! caller whether its transition won. Nothing here reads-then-writes.
//!
//! The default implementation is [`sqlite::SqliteStore`]. Trait methods use
//! `impl Future` in their signatures so no `async-trait` boxing is needed on
//! this hot path.

pub mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::job::{Job, JobFilter, JobId, JobStats, JsonMap};

pub use sqlite::SqliteStore;

pub trait JobStore: Send + Sync + 'static {
    /// Persist a new record. The record is expected to be `pending`.
    fn insert_job(&self, job: &Job) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    fn get_job(&self, id: &str)
    -> impl Future<Output = Result<Option<Job>, sqlx::Error>> + Send;

    /// Newest first, capped at `filter.limit`.
    fn list_jobs(
        &self,
        filter: &JobFilter,
    ) -> impl Future<Output = Result<Vec<Job>, sqlx::Error>> + Send;

    fn job_stats(
        &self,
        user_id: Option<&str>,
    ) -> impl Future<Output = Result<JobStats, sqlx::Error>> + Send;

    /// `pending -> running`; resets progress to 0 and stamps `started_at`.
    fn mark_running(&self, id: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// Applies only while `running`. Progress is stored as
    /// `max(current, progress)`; `metadata`/`result_data` replace the stored
    /// bags wholesale when `Some`.
    fn update_progress(
        &self,
        id: &str,
        progress: u8,
        metadata: Option<&JsonMap>,
        result_data: Option<&JsonMap>,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// `running -> completed`, progress 100. `None` keeps the last partial result.
    fn complete_job(
        &self,
        id: &str,
        result_data: Option<&JsonMap>,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// `pending | running -> failed`.
    fn fail_job(
        &self,
        id: &str,
        error_message: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// `pending | running -> cancelled`.
    fn cancel_job(&self, id: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// Hard delete, only applied when the job is in a terminal state.
    fn delete_job(&self, id: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// Pending jobs created before `cutoff`, ordered by `(created_at, id)`.
    ///
    /// `after` is the `(created_at, id)` of the last job of the previous
    /// page; only jobs ordered after it are returned.
    fn pending_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<(DateTime<Utc>, JobId)>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, sqlx::Error>> + Send;

    /// Fails every `running` job whose last write is older than `cutoff`.
    /// Returns the ids that were failed.
    fn fail_stale_running(
        &self,
        cutoff: DateTime<Utc>,
        error_message: &str,
    ) -> impl Future<Output = Result<Vec<JobId>, sqlx::Error>> + Send;
}
