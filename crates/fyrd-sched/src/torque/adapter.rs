//! Torque adapter for job submission and tracking.

use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::{SchedError, SchedResult};
use crate::job::JobState;
use crate::torque::parser;

/// Torque job state.
///
/// Torque uses single-letter state codes:
/// - Q: Queued (waiting in queue)
/// - R: Running
/// - E: Exiting (job completing)
/// - C: Completed
/// - H: Held
/// - W: Waiting (delayed start)
/// - S: Suspended
/// - T: Being moved to new location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorqueState {
    /// Job is queued and waiting for resources.
    Queued,
    /// Job is currently running.
    Running,
    /// Job is exiting (finishing up).
    Exiting,
    /// Job has completed, check the exit status for success.
    Completed,
    /// Job is held and will not run until released.
    Held,
    /// Job is waiting for its start time or a dependency.
    Waiting,
    /// Job has been suspended.
    Suspended,
    /// Job is being moved to another location.
    Transit,
    /// Unknown state.
    Unknown(String),
}

impl TorqueState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TorqueState::Completed)
    }
}

/// Information about a Torque job.
#[derive(Debug, Clone)]
pub struct TorqueJobInfo {
    /// Torque job ID (e.g., "12345.server").
    pub job_id: String,

    /// Job name.
    pub name: String,

    /// Current state.
    pub state: TorqueState,

    /// Queue the job is in.
    pub queue: Option<String>,

    /// Exit status (for completed jobs).
    pub exit_status: Option<i32>,
}

impl TorqueJobInfo {
    /// Map onto the backend-independent job state.
    ///
    /// Completed jobs with a non-zero exit status count as failed.
    pub fn job_state(&self) -> JobState {
        match self.state {
            TorqueState::Queued | TorqueState::Waiting | TorqueState::Transit => JobState::Queued,
            TorqueState::Running | TorqueState::Exiting => JobState::Running,
            TorqueState::Held | TorqueState::Suspended => JobState::Held,
            TorqueState::Completed => match self.exit_status {
                Some(0) | None => JobState::Completed,
                // qdel'd jobs report a negative or signal-range status
                Some(code) if code < 0 || code == 271 => JobState::Cancelled,
                Some(_) => JobState::Failed,
            },
            TorqueState::Unknown(_) => JobState::Submitted,
        }
    }
}

/// Adapter for the Torque scheduler.
pub struct TorqueAdapter {
    /// Limit for a single Torque command.
    timeout: Duration,
    /// Server name used for mock job ids.
    server: String,
    /// Whether to use mock mode (for testing).
    mock_mode: bool,
    /// Mock job counter for generating fake job IDs.
    mock_counter: AtomicU64,
    /// Cancelled mock jobs.
    mock_cancelled: Mutex<FxHashMap<String, i32>>,
    /// Queue length reported in mock mode.
    mock_queue_len: AtomicUsize,
    /// Mock submissions left to reject.
    mock_failures: AtomicU32,
}

impl Default for TorqueAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TorqueAdapter {
    /// Create an adapter that calls the Torque commands on `PATH`.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            server: "torque-server".to_string(),
            mock_mode: false,
            mock_counter: AtomicU64::new(1000),
            mock_cancelled: Mutex::new(FxHashMap::default()),
            mock_queue_len: AtomicUsize::new(0),
            mock_failures: AtomicU32::new(0),
        }
    }

    /// Create an adapter in mock mode (for testing).
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

    /// Submit a script with qsub, returning the Torque job ID.
    pub async fn submit(&self, script_path: &Path, dependencies: &[String]) -> SchedResult<String> {
        if self.mock_mode {
            let rejected = self
                .mock_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                return Err(parser::parse_qsub_error(
                    "qsub: submit error (Maximum number of jobs already in queue MSG=total number of jobs in queue exceeds the queue limit)",
                ));
            }
            let job_id = self.mock_counter.fetch_add(1, Ordering::SeqCst);
            return Ok(format!("{job_id}.{}", self.server));
        }

        let mut args = Vec::new();
        if !dependencies.is_empty() {
            let depends: Vec<String> = dependencies
                .iter()
                .map(|dep| format!("afterok:{dep}"))
                .collect();
            args.push("-W".to_string());
            args.push(format!("depend={}", depends.join(",")));
        }
        args.push(script_path.to_string_lossy().into_owned());

        let output = self.run("qsub", &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(parser::parse_qsub_error(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = parser::parse_qsub_output(&stdout)?;
        tracing::debug!("qsub accepted {} as job {}", script_path.display(), job_id);
        Ok(job_id)
    }

    /// Get the status of a Torque job.
    pub async fn status(&self, job_id: &str) -> SchedResult<TorqueJobInfo> {
        if self.mock_mode {
            let exit_status = self
                .mock_cancelled
                .lock()
                .await
                .get(job_id)
                .copied()
                .unwrap_or(0);
            return Ok(TorqueJobInfo {
                job_id: job_id.to_string(),
                name: "mock_job".to_string(),
                state: TorqueState::Completed,
                queue: None,
                exit_status: Some(exit_status),
            });
        }

        let args = ["-f".to_string(), job_id.to_string()];
        let output = self.run("qstat", &args).await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("Unknown Job Id") || stderr.contains("does not exist") {
            return Err(SchedError::TorqueJobNotFound(job_id.to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parser::parse_qstat_full_output(&stdout)?
            .ok_or_else(|| SchedError::TorqueJobNotFound(job_id.to_string()))
    }

    /// Cancel a Torque job.
    pub async fn cancel(&self, job_id: &str) -> SchedResult<()> {
        if self.mock_mode {
            self.mock_cancelled
                .lock()
                .await
                .insert(job_id.to_string(), 271);
            return Ok(());
        }

        let output = self.run("qdel", &[job_id.to_string()]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        parser::parse_qdel_output(&stdout, &stderr)
    }

    /// Number of jobs `user` has in the queue.
    pub async fn queue_len(&self, user: &str) -> SchedResult<usize> {
        if self.mock_mode {
            return Ok(self.mock_queue_len.load(Ordering::SeqCst));
        }

        let output = self.run("qstat", &["-u".to_string(), user.to_string()]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedError::TorqueCommandError {
                command: "qstat".to_string(),
                message: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parser::parse_queue_ids(&stdout).len())
    }

    /// Run a Torque command with the adapter's timeout.
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
        .map_err(|e| SchedError::TorqueCommandError {
            command: command.to_string(),
            message: e.to_string(),
        })
    }
}
