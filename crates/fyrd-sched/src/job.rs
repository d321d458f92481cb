//! Job types and the job builder.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{SchedError, SchedResult};
use crate::options::{JobOptions, OptionTable};
use crate::script::{self, Script};

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// First eight hex digits, used in job names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend a job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    Slurm,
    Torque,
    Local,
}

impl QueueType {
    /// Pick a backend from the commands available on `PATH`.
    ///
    /// `sbatch` selects SLURM, `qsub` selects Torque, anything else runs locally.
    pub fn detect() -> Self {
        if command_on_path("sbatch") {
            QueueType::Slurm
        } else if command_on_path("qsub") {
            QueueType::Torque
        } else {
            QueueType::Local
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueueType::Slurm => "slurm",
            QueueType::Torque => "torque",
            QueueType::Local => "local",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueueType {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slurm" => Ok(QueueType::Slurm),
            "torque" | "pbs" => Ok(QueueType::Torque),
            "local" => Ok(QueueType::Local),
            "auto" => Ok(QueueType::detect()),
            other => Err(SchedError::UnknownQueueType(other.to_string())),
        }
    }
}

fn command_on_path(command: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(command).is_file())
    })
}

/// A function called on the compute node by an interpreter-side runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Dotted path of the function, e.g. `os.path.join`.
    pub function: String,

    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,

    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,

    /// Interpreter that runs the call, taken from the config when unset.
    #[serde(default)]
    pub interpreter: Option<String>,
}

impl FunctionCall {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            interpreter: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Last segment of the dotted path.
    pub fn short_name(&self) -> &str {
        self.function
            .rsplit('.')
            .next()
            .unwrap_or(&self.function)
    }
}

/// What a job runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// A shell command.
    Script { command: String },
    /// A function call with JSON arguments.
    Function(FunctionCall),
}

impl JobKind {
    pub fn table(&self) -> OptionTable {
        match self {
            JobKind::Script { .. } => OptionTable::Job,
            JobKind::Function(_) => OptionTable::Function,
        }
    }

    /// Base for the generated job name.
    fn base_name(&self) -> String {
        let base = match self {
            JobKind::Script { command } => command
                .split_whitespace()
                .next()
                .and_then(|exe| Path::new(exe).file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            JobKind::Function(call) => call.short_name().to_string(),
        };
        if base.is_empty() { "job".to_string() } else { base }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Built but nothing written yet.
    NotSubmitted,
    /// Scripts written to disk.
    Written,
    /// Handed to the scheduler.
    Submitted,
    /// Waiting in the queue.
    Queued,
    Running,
    Held,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Check if this represents a successful completion.
    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Completed)
    }

    /// Whether the job was handed to a scheduler and has not finished.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobState::Submitted | JobState::Queued | JobState::Running | JobState::Held
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::NotSubmitted => "not_submitted",
            JobState::Written => "written",
            JobState::Submitted => "submitted",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Held => "held",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Files generated for a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobScripts {
    /// Script handed to sbatch, qsub or bash.
    pub submission: Script,

    /// Tracked script run by the SLURM wrapper through `srun`.
    pub exec: Option<Script>,

    /// Interpreter-side runner for function jobs.
    pub function: Option<Script>,

    /// JSON arguments for function jobs.
    pub function_input: Option<Script>,
}

impl JobScripts {
    /// Every generated file, submission script first.
    pub fn all(&self) -> impl Iterator<Item = &Script> {
        std::iter::once(&self.submission)
            .chain(self.exec.as_ref())
            .chain(self.function.as_ref())
            .chain(self.function_input.as_ref())
    }
}

/// A job and everything needed to write, submit and collect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub kind: JobKind,
    pub qtype: QueueType,
    pub options: JobOptions,
    pub state: JobState,

    /// Id assigned by the scheduler (or the local executor).
    pub queue_id: Option<String>,

    /// Queue ids this job waits for.
    pub dependencies: Vec<String>,

    pub runpath: PathBuf,
    pub outpath: PathBuf,
    pub scriptpath: PathBuf,
    pub outfile: PathBuf,
    pub errfile: PathBuf,

    /// JSON result of a function job.
    pub function_output: Option<PathBuf>,

    pub scripts: JobScripts,

    /// Delete generated scripts once outputs are collected.
    pub clean_files: bool,

    /// Delete output files once they are collected.
    pub clean_outputs: bool,

    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl Job {
    /// Start building a shell command job.
    pub fn script(command: impl Into<String>) -> JobBuilder {
        JobBuilder::new(JobKind::Script {
            command: command.into(),
        })
    }

    /// Start building a function-call job.
    pub fn function(call: FunctionCall) -> JobBuilder {
        JobBuilder::new(JobKind::Function(call))
    }

    /// The shell command the tracked script runs.
    pub fn command(&self) -> String {
        match &self.kind {
            JobKind::Script { command } => command.clone(),
            JobKind::Function(call) => {
                let runner = script::function_runner_path(&self.scriptpath, &self.name, &self.suffix());
                format!(
                    "{} {}",
                    call.interpreter.as_deref().unwrap_or("python3"),
                    script::shell_quote(&runner.to_string_lossy())
                )
            }
        }
    }

    /// Suffix used for generated file names.
    pub fn suffix(&self) -> String {
        self.options.suffix()
    }

    /// Whether the job ran or is running somewhere.
    pub fn is_submitted(&self) -> bool {
        self.queue_id.is_some()
    }

    /// Record a state change, stamping completion time on terminal states.
    pub fn set_state(&mut self, state: JobState) {
        if state != self.state {
            tracing::debug!("Job {} changed state: {} -> {}", self.name, self.state, state);
        }
        self.state = state;
        if state.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Builder for [`Job`].
#[derive(Debug, Clone)]
pub struct JobBuilder {
    kind: JobKind,
    name: Option<String>,
    qtype: Option<QueueType>,
    options: Vec<(String, Value)>,
    profile: Option<String>,
}

impl JobBuilder {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            name: None,
            qtype: None,
            options: Vec::new(),
            profile: None,
        }
    }

    /// Base name for the job. A short unique suffix is always appended.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Backend to use instead of the configured one.
    pub fn qtype(mut self, qtype: QueueType) -> Self {
        self.qtype = Some(qtype);
        self
    }

    /// Add an option. Validation happens in [`JobBuilder::build`].
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    pub fn options<I, K, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.options
            .extend(options.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Profile to merge below the explicit options.
    pub fn profile(mut self, name: impl Into<String>) -> Self {
        self.profile = Some(name.into());
        self
    }

    /// Validate options, resolve paths and generate the job's scripts.
    ///
    /// Options are merged in priority order: explicit options, the named profile,
    /// the `default` profile, then the config-wide `opts`.
    pub fn build(self, config: &Config) -> SchedResult<Job> {
        let mut kind = self.kind;
        let table = kind.table();

        let mut options = JobOptions::new(table);
        for (key, value) in self.options {
            options.set(&key, value)?;
        }
        if let Some(profile) = self.profile.as_deref() {
            options.fill_from(&config.profile(profile)?);
        }
        options.fill_from(&config.profile("default")?);
        options.fill_from(&config.opts()?);

        let qtype = match self.qtype {
            Some(qtype) => qtype,
            None => config.qtype()?,
        };

        if !options.is_set("suffix") {
            options.replace("suffix", config.jobs.suffix.as_str())?;
        }
        let suffix = options.suffix();

        let id = JobId::new();
        let base = self.name.unwrap_or_else(|| kind.base_name());
        let name = sanitize_name(&format!("{base}.{}", id.short()));

        let cwd = std::env::current_dir()?;
        let runpath = absolute(&cwd, options.path("dir").unwrap_or_else(|| cwd.clone()));
        let outpath = options
            .path("outpath")
            .or_else(|| config.jobs.outpath.clone())
            .map(|p| absolute(&runpath, p))
            .unwrap_or_else(|| runpath.clone());
        let scriptpath = options
            .path("scriptpath")
            .or_else(|| config.jobs.scriptpath.clone())
            .map(|p| absolute(&runpath, p))
            .unwrap_or_else(|| outpath.clone());

        let outfile = output_file(options.path("outfile"), &runpath, &outpath, &name, &suffix, "out");
        let errfile = output_file(options.path("errfile"), &runpath, &outpath, &name, &suffix, "err");

        let dependencies = options.depends();
        validate_dependencies(qtype, &dependencies)?;

        let function_output = match &mut kind {
            JobKind::Function(call) => {
                call.interpreter
                    .get_or_insert_with(|| config.jobs.interpreter.clone());
                let mut path = outfile.clone().into_os_string();
                path.push(".func.json");
                Some(PathBuf::from(path))
            }
            JobKind::Script { .. } => None,
        };

        let clean_files = options.flag("clean_files").unwrap_or(config.jobs.clean_files);
        let clean_outputs = options
            .flag("clean_outputs")
            .unwrap_or(config.jobs.clean_outputs);

        let mut job = Job {
            id,
            name,
            kind,
            qtype,
            options,
            state: JobState::NotSubmitted,
            queue_id: None,
            dependencies,
            runpath,
            outpath,
            scriptpath,
            outfile,
            errfile,
            function_output,
            scripts: JobScripts::default(),
            clean_files,
            clean_outputs,
            created_at: Utc::now(),
            submitted_at: None,
            completed_at: None,
            exit_code: None,
        };
        job.scripts = script::generate(&job)?;

        tracing::debug!("Built {} job {} ({})", job.qtype, job.name, job.id);
        Ok(job)
    }
}

fn absolute(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() { path } else { base.join(path) }
}

/// Resolve an output file. Bare file names land in `outpath`, relative paths with a
/// directory are taken relative to the run directory.
fn output_file(
    explicit: Option<PathBuf>,
    runpath: &Path,
    outpath: &Path,
    name: &str,
    suffix: &str,
    ext: &str,
) -> PathBuf {
    match explicit {
        Some(path) if path.is_absolute() => path,
        Some(path) if path.parent().is_none_or(|p| p.as_os_str().is_empty()) => outpath.join(path),
        Some(path) => runpath.join(path),
        None => outpath.join(format!("{name}.{suffix}.{ext}")),
    }
}

fn validate_dependencies(qtype: QueueType, dependencies: &[String]) -> SchedResult<()> {
    for dep in dependencies {
        let valid = match qtype {
            QueueType::Slurm | QueueType::Local => {
                !dep.is_empty() && dep.chars().all(|c| c.is_ascii_digit())
            }
            QueueType::Torque => dep.chars().next().is_some_and(|c| c.is_ascii_digit()),
        };
        if !valid {
            return Err(SchedError::InvalidDependency(format!(
                "'{dep}' is not a valid {qtype} job id"
            )));
        }
    }
    Ok(())
}

/// Restrict a job name to characters every scheduler accepts.
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = sanitized.trim_start_matches(['.', '-']);
    if trimmed.is_empty() {
        "job".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Filter for listing stored jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Filter by state.
    pub states: Option<Vec<JobState>>,

    /// Filter by backend.
    pub qtype: Option<QueueType>,

    /// Filter by name prefix.
    pub name_prefix: Option<String>,

    /// Include only jobs that have not finished.
    pub active_only: bool,

    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Jobs that are submitted and not yet finished.
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Default::default()
        }
    }

    pub fn with_states(mut self, states: impl IntoIterator<Item = JobState>) -> Self {
        self.states = Some(states.into_iter().collect());
        self
    }

    pub fn with_qtype(mut self, qtype: QueueType) -> Self {
        self.qtype = Some(qtype);
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Limit results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if a job matches this filter.
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(ref states) = self.states {
            if !states.contains(&job.state) {
                return false;
            }
        }

        if self.active_only && !job.state.is_active() {
            return false;
        }

        if let Some(qtype) = self.qtype {
            if job.qtype != qtype {
                return false;
            }
        }

        if let Some(ref prefix) = self.name_prefix {
            if !job.name.starts_with(prefix.as_str()) {
                return false;
            }
        }

        true
    }
}
