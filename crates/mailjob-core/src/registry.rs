//! Task registry: maps each [`JobType`] to the body that executes it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TaskError;
use crate::job::{JobType, JsonMap};
use crate::tasks::{GenerateEmails, ScrapeEmails, VerifyEmails};
use crate::worker::JobContext;

/// Executable body for one job type.
///
/// `run` receives the job's metadata and a [`JobContext`]. Long-running bodies
/// must call [`JobContext::checkpoint`] between units of work; that is where
/// cancellation and the execution deadline are observed. The returned map
/// becomes the job's final `result_data`.
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    /// Reject bad input before a job record is created.
    fn validate(&self, _metadata: &JsonMap) -> Result<(), String> {
        Ok(())
    }

    async fn run(&self, metadata: JsonMap, ctx: &mut JobContext) -> Result<JsonMap, TaskError>;
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    bodies: HashMap<JobType, Arc<dyn TaskBody>>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.bodies.keys().map(|t| t.as_ref()).collect();
        types.sort_unstable();
        f.debug_struct("TaskRegistry").field("types", &types).finish()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in email tasks. `send-emails` and
    /// `ai-generate` have no built-in body.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(JobType::VerifyEmails, VerifyEmails);
        registry.register(JobType::GenerateEmails, GenerateEmails);
        registry.register(JobType::ScrapeEmails, ScrapeEmails);
        registry
    }

    /// Install `body` for `job_type`, replacing any previous one.
    pub fn register(&mut self, job_type: JobType, body: impl TaskBody) -> &mut Self {
        self.bodies.insert(job_type, Arc::new(body));
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn TaskBody>> {
        self.bodies.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.bodies.contains_key(&job_type)
    }

    pub fn job_types(&self) -> impl Iterator<Item = JobType> + '_ {
        self.bodies.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl TaskBody for Echo {
        async fn run(&self, metadata: JsonMap, _ctx: &mut JobContext) -> Result<JsonMap, TaskError> {
            Ok(metadata)
        }
    }

    #[test]
    fn builtin_covers_email_tasks_only() {
        let r = TaskRegistry::with_builtin();
        assert!(r.contains(JobType::VerifyEmails));
        assert!(r.contains(JobType::GenerateEmails));
        assert!(r.contains(JobType::ScrapeEmails));
        assert!(!r.contains(JobType::SendEmails));
        assert!(!r.contains(JobType::AiGenerate));
    }

    #[test]
    fn register_replaces_and_default_validate_accepts() {
        let mut r = TaskRegistry::with_builtin();
        r.register(JobType::SendEmails, Echo);
        let body = r.get(JobType::SendEmails).unwrap();
        assert!(body.validate(&JsonMap::new()).is_ok());
        assert_eq!(r.job_types().count(), 4);
        assert!(format!("{r:?}").contains("send-emails"));
    }
}
