use chrono::{DateTime, SecondsFormat, Utc};
use mailjob_core::{Job, JobStats, JsonMap};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateJobRequest {
    /// One of `generate-emails`, `verify-emails`, `scrape-emails`,
    /// `send-emails`, `ai-generate`.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Task parameters, e.g. `{"totalItems": 100, "batchSize": 25}`.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: String,
    pub progress: u8,
    #[schema(value_type = Object)]
    pub metadata: JsonMap,
    #[schema(value_type = Option<Object>)]
    pub result_data: Option<JsonMap>,
    pub error_message: Option<String>,
    pub user_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobStatsResponse {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total: u64,
}

/// `GET /v1/jobs` returns either a page of jobs or, with `stats=true`,
/// per-status counts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum JobListResponse {
    Jobs { jobs: Vec<JobResponse> },
    Stats { stats: JobStatsResponse },
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsQuery {
    /// Restrict to one job type.
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    /// A status or a comma-separated set, e.g. `completed,failed`.
    pub status: Option<String>,
    /// Page size; defaults to 50, capped at 500.
    pub limit: Option<usize>,
    /// Return aggregate counts instead of jobs.
    pub stats: Option<bool>,
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub trait JobResponseExt {
    fn to_response(&self) -> JobResponse;
    fn to_status_response(&self) -> JobStatusResponse;
}

impl JobResponseExt for Job {
    fn to_response(&self) -> JobResponse {
        JobResponse {
            id: self.id.clone(),
            job_type: self.job_type.to_string(),
            status: self.status.to_string(),
            progress: self.progress,
            metadata: self.metadata.clone(),
            result_data: self.result_data.clone(),
            error_message: self.error_message.clone(),
            user_id: self.user_id.clone(),
            created_at: ts(&self.created_at),
            updated_at: ts(&self.updated_at),
            started_at: self.started_at.as_ref().map(ts),
            completed_at: self.completed_at.as_ref().map(ts),
        }
    }

    fn to_status_response(&self) -> JobStatusResponse {
        JobStatusResponse {
            job_id: self.id.clone(),
            status: self.status.to_string(),
        }
    }
}

impl From<JobStats> for JobStatsResponse {
    fn from(s: JobStats) -> Self {
        Self {
            pending: s.pending,
            running: s.running,
            completed: s.completed,
            failed: s.failed,
            cancelled: s.cancelled,
            total: s.total,
        }
    }
}
