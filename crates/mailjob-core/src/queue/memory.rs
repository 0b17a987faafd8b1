//! In-process FIFO queue.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::{JobQueue, QueueEntry};
use crate::error::QueueError;
use crate::job::JobId;

#[derive(Debug, Default)]
struct Inner {
    entries: VecDeque<QueueEntry>,
    waiting: HashSet<JobId>,
}

/// FIFO queue shared by the workers of a single process.
///
/// Entries are popped under a mutex, so each one reaches exactly one consumer.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop(&self) -> Option<QueueEntry> {
        let mut inner = self.lock();
        let entry = inner.entries.pop_front()?;
        inner.waiting.remove(&entry.job_id);
        Some(entry)
    }
}

impl JobQueue for MemoryQueue {
    async fn enqueue(&self, entry: QueueEntry) -> Result<bool, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        {
            let mut inner = self.lock();
            if !inner.waiting.insert(entry.job_id.clone()) {
                return Ok(false);
            }
            inner.entries.push_back(entry);
        }
        self.notify.notify_one();
        Ok(true)
    }

    async fn dequeue(&self) -> Result<QueueEntry, QueueError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue in between is not missed.
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return Err(QueueError::Closed);
            }
            if let Some(entry) = self.pop() {
                return Ok(entry);
            }
            notified.await;
        }
    }

    async fn try_dequeue(&self) -> Result<Option<QueueEntry>, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        Ok(self.pop())
    }

    async fn remove(&self, job_id: &str) -> Result<bool, QueueError> {
        let mut inner = self.lock();
        if !inner.waiting.remove(job_id) {
            return Ok(false);
        }
        inner.entries.retain(|e| e.job_id != job_id);
        Ok(true)
    }

    async fn contains(&self, job_id: &str) -> Result<bool, QueueError> {
        Ok(self.lock().waiting.contains(job_id))
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock().entries.len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobType, JsonMap};
    use std::sync::Arc;
    use std::time::Duration;

    fn entry() -> QueueEntry {
        QueueEntry::for_job(&Job::new(JobType::VerifyEmails, JsonMap::new(), Some("u".into())))
    }

    #[tokio::test]
    async fn fifo_order() {
        let q = MemoryQueue::new();
        let (a, b) = (entry(), entry());
        q.enqueue(a.clone()).await.unwrap();
        q.enqueue(b.clone()).await.unwrap();
        assert_eq!(q.dequeue().await.unwrap().job_id, a.job_id);
        assert_eq!(q.dequeue().await.unwrap().job_id, b.job_id);
        assert!(q.try_dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_ignored_while_waiting() {
        let q = MemoryQueue::new();
        let e = entry();
        assert!(q.enqueue(e.clone()).await.unwrap());
        assert!(!q.enqueue(e.clone()).await.unwrap());
        assert_eq!(q.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn remove_is_best_effort() {
        let q = MemoryQueue::new();
        let e = entry();
        q.enqueue(e.clone()).await.unwrap();
        assert!(q.remove(&e.job_id).await.unwrap());
        assert!(!q.remove(&e.job_id).await.unwrap());
        assert!(!q.contains(&e.job_id).await.unwrap());
        assert!(q.try_dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let q = Arc::new(MemoryQueue::new());
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let e = entry();
        q.enqueue(e.clone()).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.job_id, e.job_id);
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let q = Arc::new(MemoryQueue::new());
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        let res = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(QueueError::Closed)));
        assert!(matches!(q.enqueue(entry()).await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn concurrent_consumers_get_distinct_entries() {
        let q = Arc::new(MemoryQueue::new());
        let (a, b) = (entry(), entry());
        q.enqueue(a.clone()).await.unwrap();
        q.enqueue(b.clone()).await.unwrap();

        let c1 = tokio::spawn({
            let q = Arc::clone(&q);
            async move { q.dequeue().await.unwrap().job_id }
        });
        let c2 = tokio::spawn({
            let q = Arc::clone(&q);
            async move { q.dequeue().await.unwrap().job_id }
        });
        let (x, y) = (c1.await.unwrap(), c2.await.unwrap());
        assert_ne!(x, y);
    }

    #[tokio::test]
    async fn single_entry_goes_to_exactly_one_of_two_consumers() {
        let q = Arc::new(MemoryQueue::new());
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
