//! SQLite implementation of [`JobStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature. Migrations are embedded at
//! compile time (`sqlx::migrate!` resolves `./migrations` relative to
//! `CARGO_MANIFEST_DIR`) and run by [`SqliteStore::connect`].
//!
//! Queries use the runtime-checked `sqlx::query` form so no `DATABASE_URL`
//! is needed at build time.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::JobStore;
use crate::job::{
    format_ts, parse_ts, Job, JobFilter, JobId, JobStats, JobStatus, JobType, JsonMap,
};

const JOB_COLUMNS: &str = "id, job_type, status, progress, metadata, result_data, error_message, \
                           user_id, created_at, updated_at, started_at, completed_at";

/// SQLite-backed job record store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `url` and run pending migrations.
    ///
    /// `url` is a sqlx SQLite URL, e.g. `"sqlite://mailjob.db"` or
    /// `"sqlite::memory:"`. An in-memory database lives inside a single
    /// connection, so the pool is pinned to exactly one connection that never
    /// expires.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Shared pool, used by [`crate::queue::SqliteQueue`] to live in the same file.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    status: String,
    progress: i64,
    metadata: String,
    result_data: Option<String>,
    error_message: Option<String>,
    user_id: Option<String>,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = sqlx::Error;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_type = JobType::from_str(&row.job_type).map_err(decode_err)?;
        let status = JobStatus::from_str(&row.status).map_err(decode_err)?;
        let metadata: JsonMap = serde_json::from_str(&row.metadata).map_err(decode_err)?;
        let result_data = row
            .result_data
            .as_deref()
            .map(serde_json::from_str::<JsonMap>)
            .transpose()
            .map_err(decode_err)?;

        Ok(Job {
            id: row.id,
            job_type,
            status,
            progress: row.progress.clamp(0, 100) as u8,
            metadata,
            result_data,
            error_message: row.error_message,
            user_id: row.user_id,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
            started_at: row.started_at.as_deref().map(parse_ts),
            completed_at: row.completed_at.as_deref().map(parse_ts),
        })
    }
}

fn decode_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn to_json(map: &JsonMap) -> Result<String, sqlx::Error> {
    serde_json::to_string(map).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn now_ts() -> String {
    format_ts(&Utc::now())
}

impl JobStore for SqliteStore {
    async fn insert_job(&self, job: &Job) -> Result<(), sqlx::Error> {
        let metadata = to_json(&job.metadata)?;
        let result_data = job.result_data.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "INSERT INTO jobs (id, job_type, status, progress, metadata, result_data, error_message, \
             user_id, created_at, updated_at, started_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&job.id)
        .bind(job.job_type.as_ref())
        .bind(job.status.as_ref())
        .bind(i64::from(job.progress))
        .bind(&metadata)
        .bind(&result_data)
        .bind(&job.error_message)
        .bind(&job.user_id)
        .bind(format_ts(&job.created_at))
        .bind(format_ts(&job.updated_at))
        .bind(job.started_at.as_ref().map(format_ts))
        .bind(job.completed_at.as_ref().map(format_ts))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, sqlx::Error> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Job::try_from).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs WHERE 1 = 1"));

        if let Some(job_type) = filter.job_type {
            qb.push(" AND job_type = ").push_bind(job_type.as_ref().to_owned());
        }
        if let Some(status) = filter.status.as_ref().filter(|s| !s.0.is_empty()) {
            qb.push(" AND status IN (");
            let mut sep = qb.separated(", ");
            for s in &status.0 {
                sep.push_bind(s.as_ref().to_owned());
            }
            sep.push_unseparated(")");
        }
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id.clone());
        }
        qb.push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(filter.limit as i64);

        let rows: Vec<JobRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn job_stats(&self, user_id: Option<&str>) -> Result<JobStats, sqlx::Error> {
        let rows: Vec<(String, i64)> = match user_id {
            Some(uid) => {
                sqlx::query_as(
                    "SELECT status, COUNT(*) FROM jobs WHERE user_id = ?1 GROUP BY status",
                )
                .bind(uid)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut stats = JobStats::default();
        for (status, count) in rows {
            match JobStatus::from_str(&status) {
                Ok(s) => stats.add(s, count.max(0) as u64),
                Err(_) => tracing::warn!(status = %status, "ignoring unknown job status in stats"),
            }
        }
        Ok(stats)
    }

    async fn mark_running(&self, id: &str) -> Result<bool, sqlx::Error> {
        let now = now_ts();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'running', progress = 0, started_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_progress(
        &self,
        id: &str,
        progress: u8,
        metadata: Option<&JsonMap>,
        result_data: Option<&JsonMap>,
    ) -> Result<bool, sqlx::Error> {
        let metadata = metadata.map(to_json).transpose()?;
        let result_data = result_data.map(to_json).transpose()?;
        let result = sqlx::query(
            "UPDATE jobs SET progress = MAX(progress, ?1), \
                 metadata = COALESCE(?2, metadata), \
                 result_data = COALESCE(?3, result_data), \
                 updated_at = ?4 \
             WHERE id = ?5 AND status = 'running'",
        )
        .bind(i64::from(progress.min(100)))
        .bind(&metadata)
        .bind(&result_data)
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_job(
        &self,
        id: &str,
        result_data: Option<&JsonMap>,
    ) -> Result<bool, sqlx::Error> {
        let result_data = result_data.map(to_json).transpose()?;
        let now = now_ts();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', progress = 100, \
                 result_data = COALESCE(?1, result_data), error_message = NULL, \
                 completed_at = ?2, updated_at = ?2 \
             WHERE id = ?3 AND status = 'running'",
        )
        .bind(&result_data)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_job(&self, id: &str, error_message: &str) -> Result<bool, sqlx::Error> {
        let now = now_ts();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error_message = ?1, completed_at = ?2, updated_at = ?2 \
             WHERE id = ?3 AND status IN ('pending', 'running')",
        )
        .bind(error_message)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel_job(&self, id: &str) -> Result<bool, sqlx::Error> {
        let now = now_ts();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', completed_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND status IN ('pending', 'running')",
        )
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_job(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id = ?1 AND status IN ('completed', 'failed', 'cancelled')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn pending_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<(DateTime<Utc>, JobId)>,
        limit: usize,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let (after_ts, after_id) = match after {
            Some((ts, id)) => (Some(format_ts(&ts)), Some(id)),
            None => (None, None),
        };
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' AND created_at < ?1 \
               AND (?2 IS NULL OR created_at > ?2 OR (created_at = ?2 AND id > ?3)) \
             ORDER BY created_at ASC, id ASC LIMIT ?4"
        ))
        .bind(format_ts(&cutoff))
        .bind(after_ts)
        .bind(after_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn fail_stale_running(
        &self,
        cutoff: DateTime<Utc>,
        error_message: &str,
    ) -> Result<Vec<JobId>, sqlx::Error> {
        let now = now_ts();
        let rows: Vec<(String,)> = sqlx::query_as(
            "UPDATE jobs SET status = 'failed', error_message = ?1, completed_at = ?2, updated_at = ?2 \
             WHERE status = 'running' AND updated_at < ?3 \
             RETURNING id",
        )
        .bind(error_message)
        .bind(&now)
        .bind(format_ts(&cutoff))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::StatusFilter;
    use serde_json::json;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn meta(v: serde_json::Value) -> JsonMap {
        v.as_object().cloned().unwrap_or_default()
    }

    async fn insert(store: &SqliteStore, job_type: JobType, user: &str) -> Job {
        let job = Job::new(job_type, meta(json!({ "totalItems": 10 })), Some(user.into()));
        store.insert_job(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let store = store().await;
        let job = insert(&store, JobType::VerifyEmails, "u1").await;
        let loaded = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.job_type, JobType::VerifyEmails);
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.metadata["totalItems"], 10);
        assert_eq!(loaded.user_id.as_deref(), Some("u1"));
        assert!(store.get_job("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_running_is_a_compare_and_swap() {
        let store = store().await;
        let job = insert(&store, JobType::VerifyEmails, "u1").await;
        assert!(store.mark_running(&job.id).await.unwrap());
        assert!(!store.mark_running(&job.id).await.unwrap(), "second claim must lose");
        let loaded = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert!(loaded.started_at.is_some());
    }

    #[tokio::test]
    async fn progress_never_regresses_and_requires_running() {
        let store = store().await;
        let job = insert(&store, JobType::VerifyEmails, "u1").await;
        assert!(!store.update_progress(&job.id, 10, None, None).await.unwrap());

        store.mark_running(&job.id).await.unwrap();
        let m = meta(json!({ "processed": 5 }));
        assert!(store.update_progress(&job.id, 50, Some(&m), None).await.unwrap());
        assert!(store.update_progress(&job.id, 20, None, None).await.unwrap());
        let loaded = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.progress, 50);
        assert_eq!(loaded.metadata, m, "metadata is replaced wholesale");
    }

    #[tokio::test]
    async fn terminal_states_are_sticky() {
        let store = store().await;
        let job = insert(&store, JobType::VerifyEmails, "u1").await;
        store.mark_running(&job.id).await.unwrap();
        assert!(store.cancel_job(&job.id).await.unwrap());

        assert!(!store.complete_job(&job.id, None).await.unwrap());
        assert!(!store.fail_job(&job.id, "late").await.unwrap());
        assert!(!store.cancel_job(&job.id).await.unwrap());
        assert!(!store.update_progress(&job.id, 90, None, None).await.unwrap());

        let loaded = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Cancelled);
        assert!(loaded.error_message.is_none());
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn complete_sets_progress_and_keeps_partial_result() {
        let store = store().await;
        let job = insert(&store, JobType::VerifyEmails, "u1").await;
        store.mark_running(&job.id).await.unwrap();
        let partial = meta(json!({ "data": [1, 2] }));
        store.update_progress(&job.id, 40, None, Some(&partial)).await.unwrap();
        assert!(store.complete_job(&job.id, None).await.unwrap());

        let loaded = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.progress, 100);
        assert_eq!(loaded.result_data, Some(partial));
    }

    #[tokio::test]
    async fn delete_only_applies_to_terminal_jobs() {
        let store = store().await;
        let job = insert(&store, JobType::VerifyEmails, "u1").await;
        assert!(!store.delete_job(&job.id).await.unwrap());
        store.mark_running(&job.id).await.unwrap();
        assert!(!store.delete_job(&job.id).await.unwrap());
        store.fail_job(&job.id, "boom").await.unwrap();
        assert!(store.delete_job(&job.id).await.unwrap());
        assert!(store.get_job(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_status_set_newest_first() {
        let store = store().await;
        let a = insert(&store, JobType::VerifyEmails, "u1").await;
        let b = insert(&store, JobType::GenerateEmails, "u1").await;
        let c = insert(&store, JobType::VerifyEmails, "u1").await;
        let _other = insert(&store, JobType::VerifyEmails, "u2").await;

        store.mark_running(&a.id).await.unwrap();
        store.complete_job(&a.id, None).await.unwrap();
        store.fail_job(&b.id, "x").await.unwrap();

        let filter = JobFilter {
            status: Some(StatusFilter(vec![JobStatus::Completed, JobStatus::Failed])),
            user_id: Some("u1".into()),
            ..JobFilter::default()
        };
        let ids: Vec<_> = store
            .list_jobs(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![b.id.clone(), a.id.clone()]);

        let limited = JobFilter {
            user_id: Some("u1".into()),
            limit: 2,
            ..JobFilter::default()
        };
        let ids: Vec<_> = store
            .list_jobs(&limited)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![c.id.clone(), b.id.clone()]);

        let by_type = JobFilter {
            job_type: Some(JobType::GenerateEmails),
            ..JobFilter::default()
        };
        assert_eq!(store.list_jobs(&by_type).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let store = store().await;
        let a = insert(&store, JobType::VerifyEmails, "u1").await;
        insert(&store, JobType::VerifyEmails, "u1").await;
        insert(&store, JobType::VerifyEmails, "u2").await;
        store.cancel_job(&a.id).await.unwrap();

        let mine = store.job_stats(Some("u1")).await.unwrap();
        assert_eq!(mine.pending, 1);
        assert_eq!(mine.cancelled, 1);
        assert_eq!(mine.total, 2);

        let all = store.job_stats(None).await.unwrap();
        assert_eq!(all.total, 3);
    }

    #[tokio::test]
    async fn stale_running_jobs_are_failed() {
        let store = store().await;
        let job = insert(&store, JobType::VerifyEmails, "u1").await;
        store.mark_running(&job.id).await.unwrap();

        let none = store
            .fail_stale_running(Utc::now() - chrono::Duration::hours(1), "stale")
            .await
            .unwrap();
        assert!(none.is_empty());

        let failed = store
            .fail_stale_running(Utc::now() + chrono::Duration::seconds(1), "stale")
            .await
            .unwrap();
        assert_eq!(failed, vec![job.id.clone()]);
        let loaded = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.error_message.as_deref(), Some("stale"));
    }
}
