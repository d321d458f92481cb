//! SLURM adapter for job submission and tracking.

use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::{SchedError, SchedResult};
use crate::job::JobState;
use crate::slurm::parser;

/// SLURM job state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlurmState {
    Pending,
    Running,
    Completing,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    NodeFail,
    Preempted,
    OutOfMemory,
    Suspended,
    Unknown(String),
}

impl SlurmState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SlurmState::Completed
                | SlurmState::Failed
                | SlurmState::Timeout
                | SlurmState::Cancelled
                | SlurmState::NodeFail
                | SlurmState::OutOfMemory
        )
    }

    /// Check if this represents a successful completion.
    pub fn is_success(&self) -> bool {
        matches!(self, SlurmState::Completed)
    }

    /// Map onto the backend-independent job state.
    pub fn to_job_state(&self) -> JobState {
        match self {
            SlurmState::Pending => JobState::Queued,
            SlurmState::Running | SlurmState::Completing => JobState::Running,
            SlurmState::Completed => JobState::Completed,
            SlurmState::Cancelled => JobState::Cancelled,
            SlurmState::Suspended | SlurmState::Preempted => JobState::Held,
            SlurmState::Failed
            | SlurmState::Timeout
            | SlurmState::NodeFail
            | SlurmState::OutOfMemory => JobState::Failed,
            SlurmState::Unknown(_) => JobState::Submitted,
        }
    }
}

/// Information about a SLURM job.
#[derive(Debug, Clone)]
pub struct SlurmJobInfo {
    /// SLURM job ID.
    pub job_id: String,

    /// Job name.
    pub name: String,

    /// Current state.
    pub state: SlurmState,

    /// Reason for current state (e.g., "Resources" for pending).
    pub reason: Option<String>,

    /// Exit code (for completed jobs).
    pub exit_code: Option<i32>,
}

/// Adapter for the SLURM scheduler.
pub struct SlurmAdapter {
    /// Limit for a single SLURM command.
    timeout: Duration,
    /// Whether to use mock mode (for testing).
    mock_mode: bool,
    /// Mock job counter for generating fake job IDs.
    mock_counter: AtomicU64,
    /// States of cancelled mock jobs.
    mock_cancelled: Mutex<FxHashMap<String, SlurmState>>,
    /// Queue length reported in mock mode.
    mock_queue_len: AtomicUsize,
    /// Mock submissions left to reject.
    mock_failures: AtomicU32,
}

impl Default for SlurmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SlurmAdapter {
    /// Create an adapter that calls the SLURM commands on `PATH`.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            mock_mode: false,
            mock_counter: AtomicU64::new(1000),
            mock_cancelled: Mutex::new(FxHashMap::default()),
            mock_queue_len: AtomicUsize::new(0),
            mock_failures: AtomicU32::new(0),
        }
    }

    /// Create an adapter in mock mode (for testing).
    ///
    /// Mock jobs report as completed unless they were cancelled.
    pub fn mock() -> Self {
        Self {
            mock_mode: true,
            ..Self::new()
        }
    }

    /// Set the per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_mock(&self) -> bool {
        self.mock_mode
    }

    /// Set the queue length the mock reports.
    pub fn set_mock_queue_len(&self, len: usize) {
        self.mock_queue_len.store(len, Ordering::SeqCst);
    }

    /// Make the next `count` mock submissions fail.
    pub fn fail_next_submits(&self, count: u32) {
        self.mock_failures.store(count, Ordering::SeqCst);
    }

    /// Submit a script with sbatch, returning the SLURM job ID.
    pub async fn submit(&self, script_path: &Path, dependencies: &[String]) -> SchedResult<String> {
        if self.mock_mode {
            let rejected = self
                .mock_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                return Err(SchedError::SlurmSubmitError(
                    "sbatch: error: Batch job submission failed: Socket timed out".to_string(),
                ));
            }
            let job_id = self.mock_counter.fetch_add(1, Ordering::SeqCst);
            return Ok(job_id.to_string());
        }

        let mut args = Vec::new();
        if !dependencies.is_empty() {
            args.push(format!("--dependency=afterok:{}", dependencies.join(":")));
        }
        args.push(script_path.to_string_lossy().into_owned());

        let output = self.run("sbatch", &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedError::SlurmSubmitError(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = parser::parse_sbatch_output(&stdout)?;
        tracing::debug!("sbatch accepted {} as job {}", script_path.display(), job_id);
        Ok(job_id)
    }

    /// Get the status of a SLURM job.
    pub async fn status(&self, slurm_job_id: &str) -> SchedResult<SlurmJobInfo> {
        if self.mock_mode {
            let cancelled = self.mock_cancelled.lock().await;
            let state = cancelled
                .get(slurm_job_id)
                .cloned()
                .unwrap_or(SlurmState::Completed);
            let exit_code = state.is_success().then_some(0);
            return Ok(SlurmJobInfo {
                job_id: slurm_job_id.to_string(),
                name: "mock_job".to_string(),
                state,
                reason: None,
                exit_code,
            });
        }

        // First try squeue (for pending/running jobs)
        if let Some(info) = self.run_squeue(slurm_job_id).await? {
            return Ok(info);
        }

        // If not found in squeue, check sacct (for completed jobs)
        if let Some(info) = self.run_sacct(slurm_job_id).await? {
            return Ok(info);
        }

        Err(SchedError::SlurmJobNotFound(slurm_job_id.to_string()))
    }

    /// Cancel a SLURM job.
    pub async fn cancel(&self, slurm_job_id: &str) -> SchedResult<()> {
        if self.mock_mode {
            self.mock_cancelled
                .lock()
                .await
                .insert(slurm_job_id.to_string(), SlurmState::Cancelled);
            return Ok(());
        }

        let output = self.run("scancel", &[slurm_job_id.to_string()]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        parser::parse_scancel_output(&stdout, &stderr)
    }

    /// Number of jobs `user` has in the queue.
    pub async fn queue_len(&self, user: &str) -> SchedResult<usize> {
        if self.mock_mode {
            return Ok(self.mock_queue_len.load(Ordering::SeqCst));
        }

        let args = ["-h", "-u", user, "-o", "%i"].map(String::from);
        let output = self.run("squeue", &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedError::SlurmCommandError {
                command: "squeue".to_string(),
                message: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parser::parse_queue_ids(&stdout).len())
    }

    /// Run a SLURM command with the adapter's timeout.
    async fn run(&self, command: &str, args: &[String]) -> SchedResult<Output> {
        tracing::trace!("Running {} {}", command, args.join(" "));
        tokio::time::timeout(
            self.timeout,
            Command::new(command)
                .args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            SchedError::Timeout(format!(
                "{command} timed out after {}s",
                self.timeout.as_secs()
            ))
        })?
        .map_err(|e| SchedError::SlurmCommandError {
            command: command.to_string(),
            message: e.to_string(),
        })
    }

    /// Run squeue command to get job status.
    async fn run_squeue(&self, slurm_job_id: &str) -> SchedResult<Option<SlurmJobInfo>> {
        let args = ["-j", slurm_job_id, "-o", "%i|%j|%T|%r|%S"].map(String::from);
        let output = self.run("squeue", &args).await?;

        // squeue exits non-zero for ids that already left the queue
        if !output.status.success() {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parser::parse_squeue_output(&stdout)
    }

    /// Run sacct command to get completed job status.
    async fn run_sacct(&self, slurm_job_id: &str) -> SchedResult<Option<SlurmJobInfo>> {
        let args = ["-j", slurm_job_id, "-o", "JobID,JobName,State,ExitCode", "-P"].map(String::from);
        let output = self.run("sacct", &args).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        parser::parse_sacct_output(&stdout)
    }
}
