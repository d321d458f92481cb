//! Fyrd Command-Line Interface
//!
//! Submit shell commands and function calls to SLURM, Torque or a local worker
//! pool, and follow them until their outputs are collected.
//!
//! ```text
//! fyrd submit -o cores=4 -o mem=8GB -- samtools sort in.bam -o out.bam
//! fyrd status --all
//! fyrd output sort.1a2b3c4d
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{call, cancel, clean, conf, options, output, profile, queue, status, submit, wait};

/// Fyrd - batch job submission for SLURM, Torque and local execution
#[derive(Parser)]
#[command(name = "fyrd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of ~/.fyrd/config.yaml
    #[arg(long, global = true, env = "FYRD_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding job records (default ~/.fyrd/jobs)
    #[arg(long, global = true, env = "FYRD_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that creates a job.
#[derive(Args, Debug, Clone, Default)]
pub struct JobArgs {
    /// Job option as KEY=VALUE, may be repeated
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Profile to take default options from
    #[arg(short, long)]
    profile: Option<String>,

    /// Backend to use (slurm, torque, local, auto)
    #[arg(short, long)]
    qtype: Option<String>,

    /// Base name for the job
    #[arg(short, long)]
    name: Option<String>,

    /// Wait for the job and print its output
    #[arg(short, long)]
    wait: bool,

    /// Print the generated scripts without writing or submitting them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a shell command as a job
    Submit {
        #[command(flatten)]
        job: JobArgs,

        /// Command to run, after --
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Submit a function call as a job
    Call {
        /// Dotted path of the function, e.g. numpy.linalg.norm
        function: String,

        /// Positional arguments as JSON (plain strings are taken as is)
        #[arg(value_name = "JSON")]
        args: Vec<String>,

        /// Keyword argument as KEY=JSON, may be repeated
        #[arg(long = "kwarg", value_name = "KEY=JSON")]
        kwargs: Vec<String>,

        /// Module to import before the call, may be repeated
        #[arg(long = "import", value_name = "MODULE")]
        imports: Vec<String>,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Show job status
    Status {
        /// Job uuid, name or queue id
        job: Option<String>,

        /// Include finished jobs
        #[arg(short, long)]
        all: bool,
    },

    /// Wait for a job to finish
    Wait {
        /// Job uuid, name or queue id
        job: String,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Print the output of a job
    Output {
        /// Job uuid, name or queue id
        job: String,

        /// Print STDERR instead of STDOUT
        #[arg(long)]
        stderr: bool,
    },

    /// Cancel a job
    Cancel {
        /// Job uuid, name or queue id
        job: String,
    },

    /// Delete generated scripts of a job or a directory
    Clean {
        /// Job uuid, name or queue id
        job: Option<String>,

        /// Directory to clean instead of a single job (default: current directory)
        #[arg(long, conflicts_with = "job")]
        dir: Option<PathBuf>,

        /// Also delete output files
        #[arg(long)]
        outputs: bool,
    },

    /// List the options jobs accept
    Options {
        /// Show the table for function-call jobs
        #[arg(long)]
        function: bool,
    },

    /// Manage option profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Show or change the configuration
    Conf {
        #[command(subcommand)]
        action: ConfAction,
    },

    /// Show how many of your jobs are queued
    Queue {
        /// Backend to ask (default: configured)
        #[arg(short, long)]
        qtype: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List profiles
    List,

    /// Show the options of a profile
    Show {
        name: String,
    },

    /// Create a profile or update its options
    Set {
        name: String,

        /// Options as KEY=VALUE
        #[arg(required = true, value_name = "KEY=VALUE")]
        options: Vec<String>,
    },

    /// Delete a profile
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
enum ConfAction {
    /// Print the whole configuration
    Show,

    /// Print one section or value, e.g. queue.max_jobs
    Get {
        key: String,
    },

    /// Set a value, e.g. `fyrd conf set jobs.clean_files false`
    Set {
        key: String,
        value: String,
    },

    /// Remove a value, restoring its default
    Delete {
        key: String,
    },

    /// Restore every default
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let paths = commands::common::Paths {
        config: cli.config,
        state_dir: cli.state_dir,
    };

    // Execute command
    let result = match cli.command {
        Commands::Submit { job, command } => submit::execute(&paths, &command, &job).await,

        Commands::Call {
            function,
            args,
            kwargs,
            imports,
            job,
        } => call::execute(&paths, &function, &args, &kwargs, &imports, &job).await,

        Commands::Status { job, all } => status::execute(&paths, job.as_deref(), all).await,

        Commands::Wait { job, timeout } => wait::execute(&paths, &job, timeout).await,

        Commands::Output { job, stderr } => output::execute(&paths, &job, stderr).await,

        Commands::Cancel { job } => cancel::execute(&paths, &job).await,

        Commands::Clean { job, dir, outputs } => {
            clean::execute(&paths, job.as_deref(), dir.as_deref(), outputs).await
        }

        Commands::Options { function } => {
            options::execute(function);
            Ok(())
        }

        Commands::Profile { action } => match action {
            ProfileAction::List => profile::execute_list(&paths),
            ProfileAction::Show { name } => profile::execute_show(&paths, &name),
            ProfileAction::Set { name, options } => profile::execute_set(&paths, &name, &options),
            ProfileAction::Delete { name } => profile::execute_delete(&paths, &name),
        },

        Commands::Conf { action } => match action {
            ConfAction::Show => conf::execute_show(&paths),
            ConfAction::Get { key } => conf::execute_get(&paths, &key),
            ConfAction::Set { key, value } => conf::execute_set(&paths, &key, &value),
            ConfAction::Delete { key } => conf::execute_delete(&paths, &key),
            ConfAction::Reset => conf::execute_reset(&paths),
        },

        Commands::Queue { qtype } => queue::execute(&paths, qtype.as_deref()).await,
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
