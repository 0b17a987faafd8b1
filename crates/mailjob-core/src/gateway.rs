//! Progress gateway: turns a job record into a live event stream.
//!
//! Each connection polls the record store on its own interval; there is no
//! shared broadcaster. Dropping the stream stops the polling.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::job::{Job, JobId, JobStatus, JsonMap};
use crate::manager::JobManager;
use crate::queue::JobQueue;
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Time between record reads.
    pub interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Point-in-time view of a job sent in `progress` events.
///
/// `resultData` is only attached once the job is terminal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub metadata: JsonMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_data: Option<JsonMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    fn of(job: Job) -> Self {
        let result_data = if job.status.is_terminal() {
            job.result_data
        } else {
            None
        };
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            metadata: job.metadata,
            result_data,
            error_message: job.error_message,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    Progress(JobSnapshot),
    Complete {
        #[serde(rename = "jobId")]
        job_id: JobId,
        status: JobStatus,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// SSE `event:` name.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => "connected",
            StreamEvent::Progress(_) => "progress",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Events for one subscriber. Ends after `complete` or `error`.
pub type ProgressStream = BoxStream<'static, StreamEvent>;

pub struct ProgressGateway<S, Q> {
    manager: Arc<JobManager<S, Q>>,
    config: GatewayConfig,
}

impl<S, Q> std::fmt::Debug for ProgressGateway<S, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressGateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, Q> Clone for ProgressGateway<S, Q> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            config: self.config.clone(),
        }
    }
}

enum Phase {
    Connect,
    Poll,
    Finish(StreamEvent),
    Done,
}

struct Connection<S, Q> {
    manager: Arc<JobManager<S, Q>>,
    job_id: JobId,
    period: Duration,
    ticker: Option<Interval>,
    last: Option<(JobStatus, u8)>,
    phase: Phase,
}

impl<S: JobStore, Q: JobQueue> ProgressGateway<S, Q> {
    pub fn new(manager: Arc<JobManager<S, Q>>, config: GatewayConfig) -> Self {
        Self { manager, config }
    }

    /// Subscribe to `job_id`.
    ///
    /// Emits `connected`, then a `progress` event whenever status or
    /// progress differs from the last one sent. On the first terminal read it
    /// emits a final `progress` and a `complete`, then ends. Ownership is
    /// the caller's concern.
    pub fn open(&self, job_id: JobId) -> ProgressStream {
        let conn = Connection {
            manager: Arc::clone(&self.manager),
            job_id,
            period: self.config.interval,
            ticker: None,
            last: None,
            phase: Phase::Connect,
        };
        stream::unfold(conn, step).boxed()
    }
}

async fn step<S: JobStore, Q: JobQueue>(
    mut conn: Connection<S, Q>,
) -> Option<(StreamEvent, Connection<S, Q>)> {
    match std::mem::replace(&mut conn.phase, Phase::Done) {
        Phase::Done => None,
        Phase::Finish(event) => Some((event, conn)),
        Phase::Connect => {
            conn.phase = Phase::Poll;
            let event = StreamEvent::Connected {
                job_id: conn.job_id.clone(),
            };
            Some((event, conn))
        }
        Phase::Poll => {
            let period = conn.period;
            loop {
                // First tick completes immediately.
                conn.ticker
                    .get_or_insert_with(|| {
                        let mut t = tokio::time::interval(period);
                        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        t
                    })
                    .tick()
                    .await;

                let job = match conn.manager.get_job(&conn.job_id).await {
                    Ok(Some(job)) => job,
                    Ok(None) => {
                        debug!(job_id = %conn.job_id, "stream target disappeared");
                        let event = StreamEvent::Error {
                            message: "job not found".into(),
                        };
                        return Some((event, conn));
                    }
                    Err(e) => {
                        warn!(job_id = %conn.job_id, error = %e, "stream read failed");
                        let event = StreamEvent::Error {
                            message: "failed to read job status".into(),
                        };
                        return Some((event, conn));
                    }
                };

                let key = (job.status, job.progress);
                if job.status.is_terminal() {
                    conn.phase = Phase::Finish(StreamEvent::Complete {
                        job_id: conn.job_id.clone(),
                        status: job.status,
                    });
                    return Some((StreamEvent::Progress(JobSnapshot::of(job)), conn));
                }
                if conn.last != Some(key) {
                    conn.last = Some(key);
                    conn.phase = Phase::Poll;
                    return Some((StreamEvent::Progress(JobSnapshot::of(job)), conn));
                }
            }
        }
    }
}
