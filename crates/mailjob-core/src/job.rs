//! Job data model shared by every component of the core.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Opaque job identifier (UUID v4 text).
pub type JobId = String;

/// Open key/value bag used for `metadata` and `result_data`.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Closed set of task kinds a job may run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum JobType {
    GenerateEmails,
    VerifyEmails,
    ScrapeEmails,
    SendEmails,
    AiGenerate,
}

/// Lifecycle state of a job.
///
/// `Pending -> Running -> {Completed | Failed | Cancelled}`; a pending job may
/// also go straight to `Cancelled` or `Failed` (enqueue exhausted). Terminal
/// states are sticky.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Statuses that represent live work (not deletable, cancellable).
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Running];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    /// Parse a comma-separated status set such as `"completed,failed"`.
    ///
    /// Blank segments are ignored and duplicates collapse.
    pub fn parse_set(raw: &str) -> Result<Vec<JobStatus>, strum::ParseError> {
        let mut out = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let status: JobStatus = part.parse()?;
            if !out.contains(&status) {
                out.push(status);
            }
        }
        Ok(out)
    }
}

/// A durable job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    /// 0..=100. Reads 0 while pending, 100 once completed.
    pub progress: u8,
    pub metadata: JsonMap,
    pub result_data: Option<JsonMap>,
    /// Set only when `status == Failed`.
    pub error_message: Option<String>,
    /// Owner; immutable after creation.
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly once, on the first transition into a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a fresh `pending` record owned by `user_id`.
    pub fn new(job_type: JobType, metadata: JsonMap, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            job_type,
            status: JobStatus::Pending,
            progress: 0,
            metadata,
            result_data: None,
            error_message: None,
            user_id,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Deny-by-default ownership check: a job without an owner matches nobody.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

/// Status filter for listing: a single value or a set with OR semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFilter(pub Vec<JobStatus>);

impl From<JobStatus> for StatusFilter {
    fn from(status: JobStatus) -> Self {
        Self(vec![status])
    }
}

impl From<Vec<JobStatus>> for StatusFilter {
    fn from(statuses: Vec<JobStatus>) -> Self {
        Self(statuses)
    }
}

/// Query for [`crate::store::JobStore::list_jobs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub status: Option<StatusFilter>,
    pub user_id: Option<String>,
    pub limit: usize,
}

impl JobFilter {
    pub const DEFAULT_LIMIT: usize = 50;
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            job_type: None,
            status: None,
            user_id: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// Aggregate counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total: u64,
}

impl JobStats {
    pub(crate) fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Running => self.running += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Cancelled => self.cancelled += count,
        }
        self.total += count;
    }
}

/// Fixed-width RFC 3339 so that text ordering equals time ordering.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        tracing::warn!(raw = %raw, error = %e, "failed to parse job timestamp; using now");
        Utc::now()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn job_type_round_trips_kebab_case() {
        assert_eq!(JobType::VerifyEmails.as_ref(), "verify-emails");
        assert_eq!("ai-generate".parse::<JobType>().unwrap(), JobType::AiGenerate);
        assert!("send-fax".parse::<JobType>().is_err());
        assert_eq!(
            serde_json::to_string(&JobType::GenerateEmails).unwrap(),
            "\"generate-emails\""
        );
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for from in JobStatus::iter().filter(|s| s.is_terminal()) {
            for to in JobStatus::iter() {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn parse_status_set_dedups_and_trims() {
        let set = JobStatus::parse_set("completed, failed,,completed").unwrap();
        assert_eq!(set, vec![JobStatus::Completed, JobStatus::Failed]);
        assert!(JobStatus::parse_set("completed,done").is_err());
    }

    #[test]
    fn ownerless_job_is_owned_by_nobody() {
        let job = Job::new(JobType::VerifyEmails, JsonMap::new(), None);
        assert!(!job.is_owned_by(""));
        let owned = Job::new(JobType::VerifyEmails, JsonMap::new(), Some("u1".into()));
        assert!(owned.is_owned_by("u1"));
        assert!(!owned.is_owned_by("u2"));
    }

    #[test]
    fn new_job_starts_pending_at_zero() {
        let job = Job::new(JobType::ScrapeEmails, JsonMap::new(), Some("u".into()));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.completed_at.is_none());
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "scrape-emails");
        assert_eq!(json["status"], "pending");
        assert!(json.get("userId").is_some());
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(5);
        assert!(format_ts(&a) < format_ts(&b));
        assert_eq!(parse_ts(&format_ts(&a)).timestamp_micros(), a.timestamp_micros());
    }
}
