//! Asynchronous job execution core.
//!
//! A client creates a job through the [`JobManager`]; it is persisted as
//! `pending` in a [`JobStore`] and handed to a [`JobQueue`]. Workers in a
//! [`WorkerPool`] take entries off the queue, claim the job, run the
//! [`TaskBody`] registered for its type and record progress as they go. The
//! [`ProgressGateway`] turns the stored record into a live event stream.
//!
//! ```rust,ignore
//! let store = SqliteStore::connect("sqlite://mailjob.db").await?;
//! let queue = SqliteQueue::new(store.pool().clone());
//! let manager = Arc::new(JobManager::new(
//!     store,
//!     queue,
//!     Arc::new(TaskRegistry::with_builtin()),
//!     ManagerConfig::default(),
//! ));
//! let pool = WorkerPool::spawn(Arc::clone(&manager), PoolConfig::default());
//! let job = manager.submit("verify-emails", metadata, Some("user-1")).await?;
//! ```

pub mod error;
pub mod gateway;
pub mod job;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod store;
pub mod tasks;
pub mod worker;


pub use error::{JobError, QueueError, TaskError};
pub use gateway::{GatewayConfig, JobSnapshot, ProgressGateway, ProgressStream, StreamEvent};
pub use job::{Job, JobFilter, JobId, JobStats, JobStatus, JobType, JsonMap, StatusFilter};
pub use manager::{JobManager, ManagerConfig, ReconcileReport};
pub use queue::{AnyQueue, JobQueue, MemoryQueue, QueueEntry, SqliteQueue};
pub use registry::{TaskBody, TaskRegistry};
pub use store::{JobStore, SqliteStore};
pub use worker::{JobContext, PoolConfig, ProcessOutcome, Worker, WorkerConfig, WorkerPool};
