//! Job records as one JSON file per job.
//!
//! The state directory is shared by every fyrd process of a user, so records are
//! written to a temporary file and renamed into place, and single-job loads always
//! go back to disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobFilter, JobId};
use crate::persistence::StateStore;

/// Job store under `<state_dir>/jobs/<uuid>.json`.
pub struct JsonStore {
    base_dir: PathBuf,
    jobs_dir: PathBuf,

    /// Records read at open time plus everything saved since.
    cache: RwLock<FxHashMap<JobId, Job>>,
}

/// Read one record. `None` when the file is gone.
async fn read_job(path: &Path) -> SchedResult<Option<Job>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SchedError::IoError(e)),
    }
}

impl JsonStore {
    /// Open the store at `state_dir`, creating it when missing.
    ///
    /// Unreadable records are skipped with a warning.
    pub async fn new(state_dir: impl AsRef<Path>) -> SchedResult<Self> {
        let base_dir = state_dir.as_ref().to_path_buf();
        let jobs_dir = base_dir.join("jobs");
        fs::create_dir_all(&jobs_dir).await?;

        let mut jobs = FxHashMap::default();
        let mut entries = fs::read_dir(&jobs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match read_job(&path).await {
                Ok(Some(job)) => {
                    jobs.insert(job.id, job);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), "Skipping job record: {e}"),
            }
        }
        tracing::debug!(count = jobs.len(), dir = %jobs_dir.display(), "Opened job store");

        Ok(Self {
            base_dir,
            jobs_dir,
            cache: RwLock::new(jobs),
        })
    }

    /// Store in a fresh directory under the system temp dir.
    pub async fn temp() -> SchedResult<Self> {
        Self::new(std::env::temp_dir().join(format!("fyrd-jobs-{}", uuid::Uuid::new_v4()))).await
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn job_path(&self, id: &JobId) -> PathBuf {
        self.jobs_dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl StateStore for JsonStore {
    async fn save_job(&self, job: &Job) -> SchedResult<()> {
        let path = self.job_path(&job.id);
        let partial = path.with_extension("json.part");
        fs::write(&partial, serde_json::to_vec_pretty(job)?).await?;
        fs::rename(&partial, &path).await?;

        self.cache.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: &JobId) -> SchedResult<Option<Job>> {
        let loaded = read_job(&self.job_path(job_id)).await?;
        let mut cache = self.cache.write().await;
        match &loaded {
            Some(job) => {
                cache.insert(job.id, job.clone());
            }
            None => {
                cache.remove(job_id);
            }
        }
        Ok(loaded)
    }

    async fn delete_job(&self, job_id: &JobId) -> SchedResult<bool> {
        let cached = self.cache.write().await.remove(job_id).is_some();
        match fs::remove_file(self.job_path(job_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(cached),
            Err(e) => Err(SchedError::IoError(e)),
        }
    }

    async fn list_jobs(&self, filter: &JobFilter) -> SchedResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .cache
            .read()
            .await
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);

        // A limit keeps the newest
        if let Some(limit) = filter.limit {
            jobs.drain(..jobs.len().saturating_sub(limit));
        }
        Ok(jobs)
    }
}
