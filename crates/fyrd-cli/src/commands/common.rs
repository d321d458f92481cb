//! Shared helpers for CLI commands.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use console::{StyledObject, style};
use indicatif::{ProgressBar, ProgressStyle};

use fyrd_sched::options::parse_assignment;
use fyrd_sched::{Cluster, Config, Job, JobBuilder, JobState, JsonStore, QueueType, StateStore};

use crate::JobArgs;

/// Locations given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Paths {
    pub config: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

/// Everything a job command works with.
pub struct Session {
    pub config: Config,
    pub store: JsonStore,
    pub cluster: Cluster,
}

impl Session {
    pub async fn open(paths: &Paths) -> Result<Self> {
        let config = load_config(paths)?;
        let state_dir = match &paths.state_dir {
            Some(dir) => dir.clone(),
            None => default_state_dir()?,
        };
        let store = JsonStore::new(&state_dir).await.with_context(|| {
            format!("Failed to open job store at {}", state_dir.display())
        })?;
        let cluster = Cluster::new(config.clone())?;
        Ok(Self {
            config,
            store,
            cluster,
        })
    }

    /// Look a job up by uuid, name or queue id.
    pub async fn find(&self, query: &str) -> Result<Job> {
        self.store
            .find(query)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No job matching '{query}'"))
    }
}

/// Load the config named on the command line, or the default one.
pub fn load_config(paths: &Paths) -> Result<Config> {
    let config = match &paths.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };
    config.context("Failed to load config")
}

/// Return the default job record directory (~/.fyrd/jobs/).
pub fn default_state_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    let state_dir = home.join(".fyrd").join("jobs");
    if !state_dir.exists() {
        fs::create_dir_all(&state_dir).with_context(|| {
            format!("Failed to create state directory: {}", state_dir.display())
        })?;
    }
    Ok(state_dir)
}

/// Apply the shared job arguments to a builder and build the job.
pub fn build_job(config: &Config, mut builder: JobBuilder, args: &JobArgs) -> Result<Job> {
    if let Some(qtype) = &args.qtype {
        builder = builder.qtype(qtype.parse::<QueueType>()?);
    }
    if let Some(name) = &args.name {
        builder = builder.name(name);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }
    for raw in &args.options {
        let (key, value) = parse_assignment(raw)?;
        builder = builder.option(key, value);
    }
    Ok(builder.build(config)?)
}

/// Submit a freshly built job and record it; wait for it when asked to or when it
/// runs locally.
pub async fn run_job(session: &Session, mut job: Job, args: &JobArgs) -> Result<()> {
    if args.dry_run {
        for script in job.scripts.all() {
            println!("{} {}", style("==>").cyan().bold(), style(script.path.display()).dim());
            println!("{}", script.content);
        }
        return Ok(());
    }

    session.cluster.submit(&mut job).await?;
    session.store.save_job(&job).await?;
    println!(
        "{} Submitted {} to {} as {}",
        style("✓").green().bold(),
        style(&job.name).cyan(),
        job.qtype,
        style(job.queue_id.as_deref().unwrap_or("-")).yellow()
    );

    // The local pool lives in this process
    if !args.wait && job.qtype != QueueType::Local {
        return Ok(());
    }

    let spinner = spinner(format!("Waiting for {}...", job.name))?;
    let result = session.cluster.get(&mut job, None).await;
    spinner.finish_and_clear();
    session.store.save_job(&job).await?;

    let output = result?;
    print_state(&job);
    if !output.stdout.is_empty() {
        print!("{}", output.stdout);
    }
    if !output.stderr.is_empty() {
        eprint!("{}", output.stderr);
    }
    if let Some(value) = &output.result {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    if !job.state.is_success() {
        anyhow::bail!("Job {} {}", job.name, job.state);
    }
    Ok(())
}

/// Spinner shown while waiting on the scheduler.
pub fn spinner(message: String) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

pub fn styled_state(state: JobState) -> StyledObject<&'static str> {
    let name = state.name();
    match state {
        JobState::Completed => style(name).green(),
        JobState::Failed | JobState::Cancelled => style(name).red(),
        JobState::Queued | JobState::Held | JobState::Submitted => style(name).yellow(),
        _ => style(name).cyan(),
    }
}

pub fn print_state(job: &Job) {
    let exit = job
        .exit_code
        .map(|code| format!(" (exit code {code})"))
        .unwrap_or_default();
    println!(
        "{} Job {} {}{}",
        style("→").cyan().bold(),
        style(&job.name).cyan(),
        styled_state(job.state).bold(),
        exit
    );
}

/// Directory `clean` works in when none is given.
pub fn clean_dir_default(dir: Option<&Path>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => std::env::current_dir().context("Failed to read current directory"),
    }
}
