//! Durable queue stored in the `job_queue` table.
//!
//! Safe for consumers in several processes sharing one database file: a
//! dequeue is a single `DELETE ... RETURNING` statement on the oldest row, and
//! SQLite serialises writers, so two consumers can never receive the same
//! entry. Waiters poll at `poll_interval` and are woken early by enqueues made
//! through the same handle.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::Notify;

use super::{JobQueue, QueueEntry};
use crate::error::QueueError;
use crate::job::{format_ts, parse_ts, JobType, JsonMap};

#[derive(Debug)]
pub struct SqliteQueue {
    pool: SqlitePool,
    notify: Notify,
    closed: AtomicBool,
    poll_interval: Duration,
}

impl SqliteQueue {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

    /// Build a queue on a pool whose migrations have already run
    /// (see [`crate::store::SqliteStore::pool`]).
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_poll_interval(pool, Self::DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            poll_interval,
        }
    }
}

type EntryRow = (String, String, String, Option<String>, String);

fn entry_from_row(
    (job_id, job_type, payload, owner_id, enqueued_at): EntryRow,
) -> Result<QueueEntry, QueueError> {
    let job_type = JobType::from_str(&job_type)
        .map_err(|e| QueueError::Store(sqlx::Error::Decode(Box::new(e))))?;
    let payload: JsonMap = serde_json::from_str(&payload)?;
    Ok(QueueEntry {
        job_id,
        job_type,
        payload,
        owner_id,
        enqueued_at: parse_ts(&enqueued_at),
    })
}

impl JobQueue for SqliteQueue {
    async fn enqueue(&self, entry: QueueEntry) -> Result<bool, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let payload = serde_json::to_string(&entry.payload)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO job_queue (job_id, job_type, payload, owner_id, enqueued_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&entry.job_id)
        .bind(entry.job_type.as_ref())
        .bind(&payload)
        .bind(&entry.owner_id)
        .bind(format_ts(&entry.enqueued_at))
        .execute(&self.pool)
        .await?;

        let admitted = result.rows_affected() == 1;
        if admitted {
            self.notify.notify_one();
        }
        Ok(admitted)
    }

    async fn dequeue(&self) -> Result<QueueEntry, QueueError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.try_dequeue().await? {
                return Ok(entry);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn try_dequeue(&self) -> Result<Option<QueueEntry>, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let row: Option<EntryRow> = sqlx::query_as(
            "DELETE FROM job_queue \
             WHERE seq = (SELECT seq FROM job_queue ORDER BY seq ASC LIMIT 1) \
             RETURNING job_id, job_type, payload, owner_id, enqueued_at",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(entry_from_row).transpose()
    }

    async fn remove(&self, job_id: &str) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM job_queue WHERE job_id = ?1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn contains(&self, job_id: &str) -> Result<bool, QueueError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM job_queue WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::store::SqliteStore;
    use std::sync::Arc;

    async fn queue() -> SqliteQueue {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        SqliteQueue::with_poll_interval(store.pool().clone(), Duration::from_millis(10))
    }

    fn entry() -> QueueEntry {
        let mut meta = JsonMap::new();
        meta.insert("totalItems".into(), 3.into());
        QueueEntry::for_job(&Job::new(JobType::VerifyEmails, meta, Some("u".into())))
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_and_payload_survives() {
        let q = queue().await;
        let e = entry();
        assert!(q.enqueue(e.clone()).await.unwrap());
        assert!(!q.enqueue(e.clone()).await.unwrap());
        assert_eq!(q.len().await.unwrap(), 1);

        let got = q.try_dequeue().await.unwrap().unwrap();
        assert_eq!(got.job_id, e.job_id);
        assert_eq!(got.job_type, JobType::VerifyEmails);
        assert_eq!(got.payload["totalItems"], 3);
        assert_eq!(got.owner_id.as_deref(), Some("u"));
        assert!(q.try_dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_is_fifo_and_remove_withdraws() {
        let q = queue().await;
        let (a, b, c) = (entry(), entry(), entry());
        for e in [&a, &b, &c] {
            q.enqueue(e.clone()).await.unwrap();
        }
        assert!(q.remove(&b.job_id).await.unwrap());
        assert!(!q.remove(&b.job_id).await.unwrap());
        assert_eq!(q.dequeue().await.unwrap().job_id, a.job_id);
        assert_eq!(q.dequeue().await.unwrap().job_id, c.job_id);
    }

    #[tokio::test]
    async fn two_concurrent_dequeues_receive_distinct_entries() {
        let q = Arc::new(queue().await);
        let (a, b) = (entry(), entry());
        q.enqueue(a.clone()).await.unwrap();
        q.enqueue(b.clone()).await.unwrap();

        let t1 = tokio::spawn({
            let q = Arc::clone(&q);
            async move { q.dequeue().await.unwrap().job_id }
        });
        let t2 = tokio::spawn({
            let q = Arc::clone(&q);
            async move { q.dequeue().await.unwrap().job_id }
        });
        let (x, y) = (t1.await.unwrap(), t2.await.unwrap());
        assert_ne!(x, y);
        assert!(q.try_dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_queue_refuses_dequeue() {
        let q = queue().await;
        q.enqueue(entry()).await.unwrap();
        q.close();
        assert!(matches!(q.dequeue().await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn single_entry_goes_to_exactly_one_of_two_consumers() {
        let q = Arc::new(queue().await);
        let e = entry();
        q.enqueue(e.clone()).await.unwrap();

        let c1 = tokio::spawn({
            let q = Arc::clone(&q);
            async move { q.dequeue().await }
        });
        let c2 = tokio::spawn({
            let q = Arc::clone(&q);
            async move { q.dequeue().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (done, waiting) = match (c1.is_finished(), c2.is_finished()) {
            (true, false) => (c1, c2),
            (false, true) => (c2, c1),
            other => panic!("expected exactly one consumer to finish, got {other:?}"),
        };
        assert_eq!(done.await.unwrap().unwrap().job_id, e.job_id);

        q.close();
        let res = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(QueueError::Closed)));
    }
}
