//! Local execution of job scripts on a pool of worker slots.
//!
//! The executor stands in for a batch scheduler on machines without one. Each job
//! takes `min(cores, threads)` slots from the pool, waits for its dependencies, then
//! runs `bash <script>` with STDOUT and STDERR redirected to the job's files. Jobs
//! get sequential numeric ids starting at 1.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;
use tokio::process::Command;
use tokio::sync::{Mutex, Notify, Semaphore, watch};

use crate::error::{SchedError, SchedResult};
use crate::job::JobState;

/// State of a locally executed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl LocalState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LocalState::Completed | LocalState::Failed | LocalState::Cancelled
        )
    }

    pub fn to_job_state(&self) -> JobState {
        match self {
            LocalState::Queued => JobState::Queued,
            LocalState::Running => JobState::Running,
            LocalState::Completed => JobState::Completed,
            LocalState::Failed => JobState::Failed,
            LocalState::Cancelled => JobState::Cancelled,
        }
    }
}

/// Status of a local job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStatus {
    pub state: LocalState,

    /// Exit code of the script, once it ran.
    pub exit_code: Option<i32>,

    /// Why the job failed without producing an exit code.
    pub error: Option<String>,
}

impl LocalStatus {
    fn new(state: LocalState) -> Self {
        Self {
            state,
            exit_code: None,
            error: None,
        }
    }

    fn exited(code: i32) -> Self {
        let state = if code == 0 {
            LocalState::Completed
        } else {
            LocalState::Failed
        };
        Self {
            state,
            exit_code: Some(code),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            state: LocalState::Failed,
            exit_code: None,
            error: Some(error.into()),
        }
    }
}

/// What the executor needs to run one job.
#[derive(Debug, Clone)]
pub struct LocalJobSpec {
    /// Script run with bash.
    pub script: PathBuf,
    /// Working directory.
    pub rundir: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    /// Slots requested, capped at the pool size.
    pub cores: usize,
    /// Local job ids that must complete first.
    pub depends: Vec<u64>,
}

struct Entry {
    status: watch::Receiver<LocalStatus>,
    cancel: Arc<Notify>,
}

/// Pool of worker slots running job scripts.
pub struct LocalExecutor {
    threads: usize,
    slots: Arc<Semaphore>,
    jobs: Mutex<FxHashMap<u64, Entry>>,
    next_id: AtomicU64,
}

impl LocalExecutor {
    /// Create an executor with `threads` slots (at least one).
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        Self {
            threads,
            slots: Arc::new(Semaphore::new(threads)),
            jobs: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of slots in the pool.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Queue a job and return its id. The job starts as soon as its dependencies
    /// finish and enough slots are free.
    pub async fn submit(&self, spec: LocalJobSpec) -> SchedResult<u64> {
        let mut jobs = self.jobs.lock().await;

        let mut deps = Vec::with_capacity(spec.depends.len());
        for dep in &spec.depends {
            let entry = jobs.get(dep).ok_or_else(|| {
                SchedError::InvalidDependency(format!("no local job with id {dep}"))
            })?;
            deps.push((*dep, entry.status.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(LocalStatus::new(LocalState::Queued));
        let cancel = Arc::new(Notify::new());
        jobs.insert(
            id,
            Entry {
                status: rx,
                cancel: Arc::clone(&cancel),
            },
        );
        drop(jobs);

        let permits = spec.cores.clamp(1, self.threads) as u32;
        let slots = Arc::clone(&self.slots);
        tracing::debug!("Queued local job {} ({})", id, spec.script.display());

        tokio::spawn(async move {
            let status = tokio::select! {
                _ = cancel.notified() => LocalStatus::new(LocalState::Cancelled),
                status = execute(id, &spec, deps, slots, permits, &tx) => status,
            };
            tracing::debug!("Local job {} finished: {:?}", id, status.state);
            tx.send_replace(status);
        });

        Ok(id)
    }

    /// Current status of a job.
    pub async fn status(&self, id: u64) -> SchedResult<LocalStatus> {
        let jobs = self.jobs.lock().await;
        let entry = jobs
            .get(&id)
            .ok_or_else(|| SchedError::JobNotFound(format!("local job {id}")))?;
        let status = entry.status.borrow().clone();
        Ok(status)
    }

    /// Wait until a job reaches a terminal state.
    pub async fn wait(&self, id: u64) -> SchedResult<LocalStatus> {
        let mut rx = {
            let jobs = self.jobs.lock().await;
            jobs.get(&id)
                .ok_or_else(|| SchedError::JobNotFound(format!("local job {id}")))?
                .status
                .clone()
        };
        let status = rx
            .wait_for(|s| s.state.is_terminal())
            .await
            .map_err(|_| SchedError::Internal(format!("local job {id} vanished")))?
            .clone();
        Ok(status)
    }

    /// Cancel a job, killing its script if it is running.
    ///
    /// Returns `false` when the job had already finished.
    pub async fn cancel(&self, id: u64) -> SchedResult<bool> {
        let cancel = {
            let jobs = self.jobs.lock().await;
            let entry = jobs
                .get(&id)
                .ok_or_else(|| SchedError::JobNotFound(format!("local job {id}")))?;
            if entry.status.borrow().state.is_terminal() {
                return Ok(false);
            }
            Arc::clone(&entry.cancel)
        };
        cancel.notify_one();
        self.wait(id).await?;
        Ok(true)
    }

    /// Number of jobs that have not finished.
    pub async fn queue_len(&self) -> usize {
        let jobs = self.jobs.lock().await;
        jobs.values()
            .filter(|entry| !entry.status.borrow().state.is_terminal())
            .count()
    }
}

async fn execute(
    id: u64,
    spec: &LocalJobSpec,
    deps: Vec<(u64, watch::Receiver<LocalStatus>)>,
    slots: Arc<Semaphore>,
    permits: u32,
    tx: &watch::Sender<LocalStatus>,
) -> LocalStatus {
    let waits = deps.into_iter().map(|(dep, mut rx)| async move {
        let done = rx
            .wait_for(|s| s.state.is_terminal())
            .await
            .map(|s| s.state == LocalState::Completed)
            .unwrap_or(false);
        (dep, done)
    });
    for (dep, done) in futures::future::join_all(waits).await {
        if !done {
            tracing::warn!("Local job {} not run, dependency {} did not complete", id, dep);
            return LocalStatus::failed(format!("dependency {dep} did not complete"));
        }
    }

    let _permit = match slots.acquire_many_owned(permits).await {
        Ok(permit) => permit,
        Err(_) => return LocalStatus::failed("executor shut down"),
    };
    tx.send_replace(LocalStatus::new(LocalState::Running));

    match run_script(spec).await {
        Ok(code) => LocalStatus::exited(code),
        Err(e) => {
            tracing::error!("Local job {} could not run: {}", id, e);
            LocalStatus::failed(e.to_string())
        }
    }
}

async fn run_script(spec: &LocalJobSpec) -> SchedResult<i32> {
    for path in [&spec.stdout, &spec.stderr] {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let stdout = tokio::fs::File::create(&spec.stdout).await?.into_std().await;
    let stderr = tokio::fs::File::create(&spec.stderr).await?.into_std().await;

    let mut child = Command::new("bash")
        .arg(&spec.script)
        .current_dir(&spec.rundir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SchedError::LocalError(format!("failed to start bash: {e}")))?;

    let status = child.wait().await?;
    // Killed by a signal
    Ok(status.code().unwrap_or(-1))
}
