//! Orchestration of jobs across the SLURM, Torque and local backends.
//!
//! [`Cluster`] owns one adapter per backend and drives a [`Job`] through its life:
//! scripts are written, the job is submitted once the user's queue has room, its
//! state is polled until it finishes, and the outputs are collected and cleaned up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId, JobKind, JobState, QueueType};
use crate::local::{LocalExecutor, LocalJobSpec};
use crate::script::{self, remove_if_exists};
use crate::slurm::SlurmAdapter;
use crate::torque::TorqueAdapter;

/// Submission attempts before giving up.
const SUBMIT_ATTEMPTS: u32 = 5;

/// Poll interval while waiting for output files.
const FILE_POLL: Duration = Duration::from_millis(500);

/// Outputs of a finished job.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub state: JobState,
    pub exit_code: Option<i32>,
    /// STDOUT without the tracking markers.
    pub stdout: String,
    pub stderr: String,
    /// Run time taken from the tracking timestamps.
    pub runtime: Option<chrono::Duration>,
    /// Return value of a function job.
    pub result: Option<Value>,
}

/// Entry point for writing, submitting and collecting jobs.
pub struct Cluster {
    config: Config,
    slurm: SlurmAdapter,
    torque: TorqueAdapter,
    /// Created by the first local submission.
    local: OnceCell<LocalExecutor>,
    /// Local jobs submitted through this cluster, by job id.
    local_jobs: Mutex<FxHashMap<JobId, u64>>,
    user: String,
}

impl Cluster {
    /// Create a cluster that runs the real scheduler commands.
    pub fn new(config: Config) -> SchedResult<Self> {
        Self::with_adapters(config, SlurmAdapter::new(), TorqueAdapter::new())
    }

    /// Create a cluster whose SLURM and Torque adapters are mocked. Local jobs still
    /// run for real.
    pub fn mock(config: Config) -> SchedResult<Self> {
        Self::with_adapters(config, SlurmAdapter::mock(), TorqueAdapter::mock())
    }

    fn with_adapters(config: Config, slurm: SlurmAdapter, torque: TorqueAdapter) -> SchedResult<Self> {
        config.opts()?;
        let timeout = Duration::from_secs(config.queue.command_timeout.max(1));
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_default();

        tracing::debug!("Cluster for user '{}'", user);
        Ok(Self {
            config,
            slurm: slurm.with_timeout(timeout),
            torque: torque.with_timeout(timeout),
            local: OnceCell::new(),
            local_jobs: Mutex::new(FxHashMap::default()),
            user,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The local pool, once a local job has been submitted.
    pub fn local(&self) -> Option<&LocalExecutor> {
        self.local.get()
    }

    /// Local pool sized by the first job that needs it.
    ///
    /// The job's own `threads` option wins over `local.threads`.
    async fn local_pool(&self, job: &Job) -> &LocalExecutor {
        let threads = if job.options.is_set("threads") {
            job.options.threads() as usize
        } else {
            self.config.local.threads
        };
        self.local
            .get_or_init(|| async move {
                tracing::debug!("Starting local pool with {} threads", threads);
                LocalExecutor::new(threads)
            })
            .await
    }

    /// Local id of a job this cluster's pool is running.
    ///
    /// `None` for local jobs submitted by another process, whose pool is not visible here.
    pub async fn owned_local_id(&self, job: &Job) -> Option<u64> {
        let id = self.local_jobs.lock().await.get(&job.id).copied()?;
        (job.queue_id.as_deref() == Some(id.to_string().as_str())).then_some(id)
    }

    async fn require_local_id(&self, job: &Job) -> SchedResult<u64> {
        self.owned_local_id(job).await.ok_or_else(|| {
            SchedError::LocalJobNotOwned(format!(
                "{} ({})",
                job.name,
                job.queue_id.as_deref().unwrap_or("-")
            ))
        })
    }

    /// Write every script of a job to disk.
    pub async fn write(&self, job: &mut Job, overwrite: bool) -> SchedResult<()> {
        for file in job.scripts.all() {
            file.write(overwrite).await?;
        }
        if job.state == JobState::NotSubmitted {
            job.set_state(JobState::Written);
        }
        tracing::debug!("Wrote scripts for {}", job.name);
        Ok(())
    }

    /// Submit a job, writing its scripts first if needed.
    ///
    /// Blocks while the user's queue is full, and retries a failed submission up to
    /// five times `sleep_len` seconds apart. Submitting a job twice does nothing.
    pub async fn submit(&self, job: &mut Job) -> SchedResult<()> {
        if job.is_submitted() {
            tracing::warn!(
                "Job {} was already submitted as {}, not submitting again",
                job.name,
                job.queue_id.as_deref().unwrap_or_default()
            );
            return Ok(());
        }
        if job.state == JobState::NotSubmitted {
            self.write(job, true).await?;
        }

        let sleep_len = Duration::from_secs(self.config.queue.sleep_len);
        self.wait_for_queue_room(job.qtype, sleep_len).await?;

        let mut attempt = 1;
        let queue_id = loop {
            match self.submit_to_backend(job).await {
                Ok(id) => break id,
                Err(e) if attempt < SUBMIT_ATTEMPTS && is_retryable(&e) => {
                    tracing::warn!(
                        "Submitting {} failed (attempt {}/{}): {}",
                        job.name,
                        attempt,
                        SUBMIT_ATTEMPTS,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(sleep_len).await;
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!("Submitted {} to {} as {}", job.name, job.qtype, queue_id);
        job.queue_id = Some(queue_id);
        job.submitted_at = Some(chrono::Utc::now());
        job.set_state(JobState::Submitted);
        Ok(())
    }

    async fn wait_for_queue_room(&self, qtype: QueueType, sleep_len: Duration) -> SchedResult<()> {
        let max_jobs = self.config.queue.max_jobs;
        loop {
            let len = self.queue_len(qtype).await?;
            if len < max_jobs {
                return Ok(());
            }
            tracing::info!(
                "Queue holds {} of {} jobs, waiting {}s",
                len,
                max_jobs,
                sleep_len.as_secs()
            );
            tokio::time::sleep(sleep_len).await;
        }
    }

    async fn submit_to_backend(&self, job: &Job) -> SchedResult<String> {
        let script = &job.scripts.submission.path;
        match job.qtype {
            QueueType::Slurm => self.slurm.submit(script, &job.dependencies).await,
            QueueType::Torque => self.torque.submit(script, &job.dependencies).await,
            QueueType::Local => {
                let depends = job
                    .dependencies
                    .iter()
                    .map(|dep| {
                        dep.parse::<u64>().map_err(|_| {
                            SchedError::InvalidDependency(format!("'{dep}' is not a local job id"))
                        })
                    })
                    .collect::<SchedResult<Vec<_>>>()?;
                let spec = LocalJobSpec {
                    script: script.clone(),
                    rundir: job.runpath.clone(),
                    stdout: job.outfile.clone(),
                    stderr: job.errfile.clone(),
                    cores: job.options.cores() as usize,
                    depends,
                };
                let id = self.local_pool(job).await.submit(spec).await?;
                self.local_jobs.lock().await.insert(job.id, id);
                Ok(id.to_string())
            }
        }
    }

    /// Refresh a job's state from its backend.
    ///
    /// A submitted job the scheduler no longer knows about is taken as completed.
    pub async fn update(&self, job: &mut Job) -> SchedResult<JobState> {
        let Some(queue_id) = job.queue_id.clone() else {
            return Ok(job.state);
        };
        if job.state.is_terminal() {
            return Ok(job.state);
        }

        let (state, exit_code) = match job.qtype {
            QueueType::Slurm => match self.slurm.status(&queue_id).await {
                Ok(info) => (info.state.to_job_state(), info.exit_code),
                Err(SchedError::SlurmJobNotFound(_)) => gone(job),
                Err(e) => return Err(e),
            },
            QueueType::Torque => match self.torque.status(&queue_id).await {
                Ok(info) => (info.job_state(), info.exit_status),
                Err(SchedError::TorqueJobNotFound(_)) => gone(job),
                Err(e) => return Err(e),
            },
            QueueType::Local => {
                let (Some(local_id), Some(pool)) =
                    (self.owned_local_id(job).await, self.local.get())
                else {
                    tracing::debug!(
                        "{} runs in another process, keeping state {}",
                        job.name,
                        job.state
                    );
                    return Ok(job.state);
                };
                match pool.status(local_id).await {
                    Ok(status) => (status.state.to_job_state(), status.exit_code),
                    Err(SchedError::JobNotFound(_)) => gone(job),
                    Err(e) => return Err(e),
                }
            }
        };

        if exit_code.is_some() {
            job.exit_code = exit_code;
        }
        job.set_state(state);
        Ok(state)
    }

    /// Wait for a job to finish and for its output files to appear.
    ///
    /// Unsubmitted jobs are submitted first when `auto_submit` is on.
    pub async fn wait(&self, job: &mut Job, timeout: Option<Duration>) -> SchedResult<JobState> {
        if !job.is_submitted() {
            if !self.config.jobs.auto_submit {
                return Err(SchedError::InvalidJobState {
                    expected: "submitted".to_string(),
                    found: job.state.to_string(),
                });
            }
            self.submit(job).await?;
        }
        if job.qtype == QueueType::Local && !job.state.is_terminal() {
            self.require_local_id(job).await?;
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let poll = Duration::from_secs(self.config.queue.queue_update.max(1));

        loop {
            if job.qtype == QueueType::Local {
                self.wait_local(job, deadline).await?;
            }
            let state = self.update(job).await?;
            if state.is_terminal() {
                break;
            }

            let mut sleep = poll;
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(SchedError::Timeout(format!(
                        "{} still {} after {}s",
                        job.name,
                        state,
                        timeout.unwrap_or_default().as_secs()
                    )));
                }
                sleep = sleep.min(left);
            }
            tracing::trace!("{} is {}, checking again in {:?}", job.name, state, sleep);
            tokio::time::sleep(sleep).await;
        }

        self.wait_for_files(job).await;
        Ok(job.state)
    }

    async fn wait_local(&self, job: &Job, deadline: Option<Instant>) -> SchedResult<()> {
        let (Some(local_id), Some(pool)) = (self.owned_local_id(job).await, self.local.get()) else {
            return Ok(());
        };
        let wait = pool.wait(local_id);
        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, wait).await {
                Ok(result) => result.map(|_| ()),
                // the polling loop reports the timeout
                Err(_) => Ok(()),
            },
            None => wait.await.map(|_| ()),
        };
        match result {
            Err(SchedError::JobNotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Block up to `file_block_time` for the output files of a finished job.
    async fn wait_for_files(&self, job: &Job) {
        let mut files = vec![job.outfile.clone(), job.errfile.clone()];
        if job.state == JobState::Completed {
            files.extend(job.function_output.clone());
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.jobs.file_block_time);
        loop {
            let mut missing = Vec::new();
            for file in &files {
                if !tokio::fs::try_exists(file).await.unwrap_or(false) {
                    missing.push(file);
                }
            }
            if missing.is_empty() {
                return;
            }
            if Instant::now() >= deadline {
                for file in missing {
                    tracing::warn!("{} did not appear for {}", file.display(), job.name);
                }
                return;
            }
            tokio::time::sleep(FILE_POLL).await;
        }
    }

    /// Wait for a job, then collect its outputs and clean up after it.
    ///
    /// A function job whose function raised returns [`SchedError::FunctionFailed`].
    pub async fn get(&self, job: &mut Job, timeout: Option<Duration>) -> SchedResult<JobOutput> {
        self.wait(job, timeout).await?;

        let tracked = script::parse_tracked_output(&read_output(&job.outfile).await?);
        let stderr = read_output(&job.errfile).await?;

        let result = match &job.kind {
            JobKind::Function(_) => match self.function_output(job).await {
                Ok(value) => Ok(Some(value)),
                Err(SchedError::MissingOutput(_)) if !job.state.is_success() => Ok(None),
                Err(e) => Err(e),
            },
            JobKind::Script { .. } => Ok(None),
        };

        if job.clean_files {
            remove_scripts(job).await?;
        }
        if job.clean_outputs {
            remove_outputs(job).await?;
        }

        let runtime = tracked.runtime();
        Ok(JobOutput {
            state: job.state,
            exit_code: job.exit_code,
            stdout: tracked.body,
            stderr,
            runtime,
            result: result?,
        })
    }

    /// STDOUT of a job with the tracking markers removed.
    pub async fn stdout(&self, job: &Job) -> SchedResult<String> {
        let text = read_output(&job.outfile).await?;
        Ok(script::parse_tracked_output(&text).body)
    }

    pub async fn stderr(&self, job: &Job) -> SchedResult<String> {
        read_output(&job.errfile).await
    }

    /// Return value of a function job.
    pub async fn function_output(&self, job: &Job) -> SchedResult<Value> {
        let (JobKind::Function(call), Some(path)) = (&job.kind, &job.function_output) else {
            return Err(SchedError::InvalidJobState {
                expected: "function job".to_string(),
                found: "script job".to_string(),
            });
        };

        let text = read_output(path).await?;
        let mut payload: Value = serde_json::from_str(&text)?;
        if let Some(message) = payload.get("error").and_then(Value::as_str) {
            return Err(SchedError::FunctionFailed {
                function: call.function.clone(),
                message: message.to_string(),
            });
        }
        payload
            .get_mut("ok")
            .map(Value::take)
            .ok_or_else(|| SchedError::Internal(format!("malformed result in {}", path.display())))
    }

    /// Delete the generated scripts of a job, and its outputs too if asked.
    pub async fn clean(&self, job: &Job, delete_outputs: bool) -> SchedResult<Vec<PathBuf>> {
        if job.state.is_active() {
            return Err(SchedError::InvalidJobState {
                expected: "finished or unsubmitted".to_string(),
                found: job.state.to_string(),
            });
        }

        let mut removed = remove_scripts(job).await?;
        if delete_outputs {
            removed.extend(remove_outputs(job).await?);
        }

        tracing::debug!("Cleaned {} files of {}", removed.len(), job.name);
        Ok(removed)
    }

    /// Cancel a job if it is still running, rewrite its scripts and submit it again.
    pub async fn resubmit(&self, job: &mut Job) -> SchedResult<()> {
        if job.state.is_active() {
            match self.cancel(job).await {
                Ok(()) => {}
                Err(SchedError::LocalJobNotOwned(_)) => {
                    tracing::warn!("{} was started by another process, not cancelling it", job.name);
                }
                Err(e) => return Err(e),
            }
        }
        job.queue_id = None;
        job.exit_code = None;
        job.submitted_at = None;
        job.completed_at = None;
        job.state = JobState::NotSubmitted;

        tracing::info!("Resubmitting {}", job.name);
        self.write(job, true).await?;
        self.submit(job).await
    }

    /// Cancel a submitted job.
    pub async fn cancel(&self, job: &mut Job) -> SchedResult<()> {
        let Some(queue_id) = job.queue_id.clone() else {
            return Err(SchedError::InvalidJobState {
                expected: "submitted".to_string(),
                found: job.state.to_string(),
            });
        };
        if job.state.is_terminal() {
            tracing::warn!("Job {} already {}, nothing to cancel", job.name, job.state);
            return Ok(());
        }

        let result = match job.qtype {
            QueueType::Slurm => self.slurm.cancel(&queue_id).await,
            QueueType::Torque => self.torque.cancel(&queue_id).await,
            QueueType::Local => {
                let id = self.require_local_id(job).await?;
                match self.local.get() {
                    Some(pool) => pool.cancel(id).await.map(|_| ()),
                    None => Err(SchedError::LocalJobNotOwned(job.name.clone())),
                }
            }
        };
        match result {
            Ok(()) => {}
            Err(SchedError::SlurmJobNotFound(_))
            | Err(SchedError::TorqueJobNotFound(_))
            | Err(SchedError::JobNotFound(_)) => {
                tracing::warn!("Job {} was no longer queued", job.name);
            }
            Err(e) => return Err(e),
        }

        tracing::info!("Cancelled {} ({})", job.name, queue_id);
        job.set_state(JobState::Cancelled);
        Ok(())
    }

    /// Number of the user's jobs in a backend's queue.
    pub async fn queue_len(&self, qtype: QueueType) -> SchedResult<usize> {
        match qtype {
            QueueType::Slurm => self.slurm.queue_len(&self.user).await,
            QueueType::Torque => self.torque.queue_len(&self.user).await,
            QueueType::Local => match self.local.get() {
                Some(pool) => Ok(pool.queue_len().await),
                None => Ok(0),
            },
        }
    }
}

/// State recorded for a job its backend has forgotten.
fn gone(job: &Job) -> (JobState, Option<i32>) {
    tracing::debug!("{} is no longer in the queue, taking it as completed", job.name);
    (JobState::Completed, None)
}

async fn remove_scripts(job: &Job) -> SchedResult<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for file in job.scripts.all() {
        if file.remove().await? {
            removed.push(file.path.clone());
        }
    }
    Ok(removed)
}

async fn remove_outputs(job: &Job) -> SchedResult<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let outputs = [&job.outfile, &job.errfile]
        .into_iter()
        .chain(job.function_output.as_ref());
    for path in outputs {
        if remove_if_exists(path).await? {
            removed.push(path.clone());
        }
    }
    Ok(removed)
}

fn is_retryable(error: &SchedError) -> bool {
    !matches!(
        error,
        SchedError::InvalidDependency(_)
            | SchedError::LocalError(_)
            | SchedError::LocalJobNotOwned(_)
    )
}

async fn read_output(path: &Path) -> SchedResult<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(SchedError::MissingOutput(path.display().to_string()))
        }
        Err(e) => Err(SchedError::IoError(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FunctionCall;

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.jobs.outpath = Some(dir.to_path_buf());
        config.jobs.file_block_time = 1;
        config.queue.queue_update = 1;
        config.queue.sleep_len = 0;
        config
    }

    #[tokio::test]
    async fn test_local_job_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let cluster = Cluster::mock(config.clone()).unwrap();

        let mut job = Job::script("echo hello from fyrd")
            .qtype(QueueType::Local)
            .option("dir", tmp.path().to_string_lossy().to_string())
            .build(&config)
            .unwrap();

        cluster.submit(&mut job).await.unwrap();
        assert_eq!(job.queue_id.as_deref(), Some("1"));
        assert!(job.scripts.submission.exists().await);

        let output = cluster
            .get(&mut job, Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(output.state, JobState::Completed);
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, "hello from fyrd\n");
        assert!(output.runtime.is_some());

        // clean_files is on by default, outputs are kept
        assert!(!job.scripts.submission.exists().await);
        assert!(job.outfile.exists());
    }

    #[tokio::test]
    async fn test_local_failure_and_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let cluster = Cluster::mock(config.clone()).unwrap();

        let mut job = Job::script("echo broken >&2; exit 4")
            .qtype(QueueType::Local)
            .name("broken")
            .build(&config)
            .unwrap();

        let state = cluster.wait(&mut job, None).await.unwrap();
        assert_eq!(state, JobState::Failed);
        assert_eq!(job.exit_code, Some(4));

        let stderr = cluster.stderr(&job).await.unwrap();
        assert!(stderr.contains("broken"));
        assert!(stderr.contains("Exited with code: 4"));
    }

    #[tokio::test]
    async fn test_submit_twice_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let cluster = Cluster::mock(config.clone()).unwrap();

        let mut job = Job::script("true")
            .qtype(QueueType::Slurm)
            .build(&config)
            .unwrap();
        cluster.submit(&mut job).await.unwrap();
        let first = job.queue_id.clone();
        assert_eq!(job.state, JobState::Submitted);

        cluster.submit(&mut job).await.unwrap();
        assert_eq!(job.queue_id, first);

        // mock SLURM reports every job as completed
        assert_eq!(cluster.update(&mut job).await.unwrap(), JobState::Completed);
    }

    #[tokio::test]
    async fn test_cancel_mock_torque() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let cluster = Cluster::mock(config.clone()).unwrap();

        let mut job = Job::script("sleep 100")
            .qtype(QueueType::Torque)
            .build(&config)
            .unwrap();

        assert!(matches!(
            cluster.cancel(&mut job).await,
            Err(SchedError::InvalidJobState { .. })
        ));

        cluster.submit(&mut job).await.unwrap();
        cluster.cancel(&mut job).await.unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_wait_without_auto_submit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        config.jobs.auto_submit = false;
        let cluster = Cluster::mock(config.clone()).unwrap();

        let mut job = Job::script("true")
            .qtype(QueueType::Local)
            .build(&config)
            .unwrap();
        assert!(matches!(
            cluster.wait(&mut job, None).await,
            Err(SchedError::InvalidJobState { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let cluster = Cluster::mock(config.clone()).unwrap();

        let mut job = Job::script("sleep 30")
            .qtype(QueueType::Local)
            .build(&config)
            .unwrap();
        let result = cluster
            .wait(&mut job, Some(Duration::from_millis(200)))
            .await;
        assert!(matches!(result, Err(SchedError::Timeout(_))));

        cluster.cancel(&mut job).await.unwrap();
        assert_eq!(job.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_function_output() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let cluster = Cluster::mock(config.clone()).unwrap();

        let job = Job::function(FunctionCall::new("math.sqrt"))
            .qtype(QueueType::Local)
            .build(&config)
            .unwrap();
        let path = job.function_output.clone().unwrap();

        std::fs::write(&path, r#"{"ok": [1, 2]}"#).unwrap();
        assert_eq!(
            cluster.function_output(&job).await.unwrap(),
            serde_json::json!([1, 2])
        );

        std::fs::write(&path, r#"{"error": "ValueError: math domain error"}"#).unwrap();
        match cluster.function_output(&job).await {
            Err(SchedError::FunctionFailed { function, message }) => {
                assert_eq!(function, "math.sqrt");
                assert!(message.contains("domain"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let script_job = Job::script("true").qtype(QueueType::Local).build(&config).unwrap();
        assert!(cluster.function_output(&script_job).await.is_err());
    }

    #[tokio::test]
    async fn test_clean_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let cluster = Cluster::mock(config.clone()).unwrap();

        let mut job = Job::script("echo out")
            .qtype(QueueType::Local)
            .build(&config)
            .unwrap();
        cluster.wait(&mut job, None).await.unwrap();
        assert!(job.outfile.exists());

        let removed = cluster.clean(&job, true).await.unwrap();
        assert!(removed.contains(&job.outfile));
        assert!(removed.contains(&job.scripts.submission.path));
        assert!(!job.errfile.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_blocks_while_queue_full() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        config.queue.max_jobs = 10;
        config.queue.sleep_len = 30;
        let cluster = Cluster::mock(config.clone()).unwrap();
        cluster.slurm.set_mock_queue_len(10);

        let mut job = Job::script("true")
            .qtype(QueueType::Slurm)
            .build(&config)
            .unwrap();
        cluster.write(&mut job, true).await.unwrap();

        let start = Instant::now();
        let drain = async {
            tokio::time::sleep(Duration::from_secs(75)).await;
            cluster.slurm.set_mock_queue_len(9);
        };
        let (result, ()) = tokio::join!(cluster.submit(&mut job), drain);
        result.unwrap();

        // checks at 0s, 30s and 60s find the queue full, 90s finds room
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(90), "{waited:?}");
        assert!(waited < Duration::from_secs(120), "{waited:?}");
        assert_eq!(job.state, JobState::Submitted);
        assert!(job.queue_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_retries_rejected_submissions() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        config.queue.sleep_len = 10;
        let cluster = Cluster::mock(config.clone()).unwrap();

        let mut job = Job::script("true")
            .qtype(QueueType::Torque)
            .build(&config)
            .unwrap();
        cluster.write(&mut job, true).await.unwrap();
        cluster.torque.fail_next_submits(3);

        let start = Instant::now();
        cluster.submit(&mut job).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(job.queue_id.as_deref().unwrap().ends_with(".torque-server"));

        // five rejections use up every attempt
        let mut rejected = Job::script("true")
            .qtype(QueueType::Torque)
            .build(&config)
            .unwrap();
        cluster.write(&mut rejected, true).await.unwrap();
        cluster.torque.fail_next_submits(SUBMIT_ATTEMPTS);

        let start = Instant::now();
        let err = cluster.submit(&mut rejected).await.unwrap_err();
        assert!(matches!(err, SchedError::TorqueSubmitError(_)), "{err}");
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(40), "{waited:?}");
        assert!(waited < Duration::from_secs(50), "{waited:?}");
        assert_eq!(rejected.state, JobState::Written);
        assert!(rejected.queue_id.is_none());
    }

    #[tokio::test]
    async fn test_missing_output() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let cluster = Cluster::mock(config.clone()).unwrap();

        let job = Job::script("true").qtype(QueueType::Local).build(&config).unwrap();
        assert!(matches!(
            cluster.stdout(&job).await,
            Err(SchedError::MissingOutput(_))
        ));
    }
}
