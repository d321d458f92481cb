//! Persistence layer for job state.

mod json_store;

pub use json_store::JsonStore;

use async_trait::async_trait;

use crate::error::SchedResult;
use crate::job::{Job, JobFilter, JobId};

/// Trait for persistent state storage.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Save a job to the store, replacing any earlier version.
    async fn save_job(&self, job: &Job) -> SchedResult<()>;

    /// Load a job from the store.
    async fn load_job(&self, job_id: &JobId) -> SchedResult<Option<Job>>;

    /// Delete a job from the store.
    async fn delete_job(&self, job_id: &JobId) -> SchedResult<bool>;

    /// List jobs matching a filter, oldest first.
    async fn list_jobs(&self, filter: &JobFilter) -> SchedResult<Vec<Job>>;

    /// Look a job up by uuid (or its first 8 hex digits), name or queue id.
    /// Torque ids also match by their numeric part.
    ///
    /// When several jobs match, the most recently created one wins.
    async fn find(&self, query: &str) -> SchedResult<Option<Job>> {
        if let Ok(id) = JobId::parse(query) {
            return self.load_job(&id).await;
        }
        let jobs = self.list_jobs(&JobFilter::default()).await?;
        Ok(jobs
            .into_iter()
            .rev()
            .find(|job| matches_query(job, query)))
    }
}

fn matches_query(job: &Job, query: &str) -> bool {
    job.name == query
        || job
            .queue_id
            .as_deref()
            .is_some_and(|q| q == query || q.split('.').next() == Some(query))
        || (query.len() == 8 && job.id.short() == query)
}
