//! Submit command implementation.
//!
//! Turn a shell command into a job and hand it to the configured backend.

use anyhow::Result;

use fyrd_sched::Job;
use fyrd_sched::script::shell_quote;

use super::common::{Paths, Session, build_job, run_job};
use crate::JobArgs;

/// Execute the submit command.
pub async fn execute(paths: &Paths, command: &[String], args: &JobArgs) -> Result<()> {
    let session = Session::open(paths).await?;
    let job = build_job(&session.config, Job::script(command_line(command)), args)?;
    run_job(&session, job, args).await
}

/// A single argument is taken as a shell line, several are quoted and joined.
pub fn command_line(command: &[String]) -> String {
    match command {
        [line] => line.clone(),
        words => words
            .iter()
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" "),
    }
}
