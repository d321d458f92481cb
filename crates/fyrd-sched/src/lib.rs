//! Fyrd: batch job submission for SLURM, Torque and local execution
//!
//! This crate turns shell commands and function calls into batch jobs, submits them
//! to whichever scheduler the machine has, and collects their outputs when they are
//! done. Without a batch system, jobs run on a local pool of worker slots instead.
//!
//! # Overview
//!
//! A job goes through four steps:
//! 1. **Build**: options are validated against the keyword registry and merged with
//!    profiles from the config file
//! 2. **Write**: a tracked bash script (plus scheduler directives) is generated
//! 3. **Submit**: the script goes to sbatch, qsub or the local pool once the user's
//!    queue has room
//! 4. **Collect**: state is polled until the job finishes, then STDOUT, STDERR and
//!    function results are read back and the generated files cleaned up
//!
//! # Supported Backends
//!
//! | Backend | Commands | Dependencies |
//! |---------|----------|--------------|
//! | SLURM | sbatch, squeue, sacct, scancel | `--dependency=afterok:<id>` |
//! | Torque | qsub, qstat, qdel | `-W depend=afterok:<id>` |
//! | Local | bash | local job ids |
//!
//! # Example: Script Job
//!
//! ```ignore
//! use fyrd_sched::{Cluster, Config, Job};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let cluster = Cluster::new(config.clone())?;
//!
//!     let mut job = Job::script("samtools sort in.bam -o out.bam")
//!         .option("cores", 4)
//!         .option("mem", "16GB")
//!         .option("modules", "samtools")
//!         .profile("large")
//!         .build(&config)?;
//!
//!     cluster.submit(&mut job).await?;
//!     let output = cluster.get(&mut job, None).await?;
//!     println!("{} exited with {:?}", job.name, output.exit_code);
//!     Ok(())
//! }
//! ```
//!
//! # Example: Function Job
//!
//! ```ignore
//! use fyrd_sched::{FunctionCall, Job};
//! use serde_json::json;
//!
//! let call = FunctionCall::new("numpy.linalg.norm").with_args([json!([3, 4])]);
//! let mut job = Job::function(call)
//!     .option("imports", "numpy")
//!     .build(&config)?;
//!
//! let output = cluster.get(&mut job, None).await?;
//! assert_eq!(output.result, Some(json!(5.0)));
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod job;
pub mod local;
pub mod options;
pub mod persistence;
pub mod script;
pub mod slurm;
pub mod torque;

// Re-exports
pub use cluster::{Cluster, JobOutput};
pub use config::Config;
pub use error::{SchedError, SchedResult};
pub use job::{
    FunctionCall, Job, JobBuilder, JobFilter, JobId, JobKind, JobState, QueueType,
};
pub use local::{LocalExecutor, LocalJobSpec, LocalState, LocalStatus};
pub use options::{JobOptions, OptionSpec, OptionTable, OptionValue, Walltime};
pub use persistence::{JsonStore, StateStore};
pub use slurm::SlurmAdapter;
pub use torque::TorqueAdapter;
