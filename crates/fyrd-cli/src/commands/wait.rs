//! Wait command implementation.
//!
//! Block until a job reaches a terminal state.

use std::time::Duration;

use anyhow::Result;

use fyrd_sched::{QueueType, StateStore};

use super::common::{Paths, Session, print_state, spinner};

/// Execute the wait command.
pub async fn execute(paths: &Paths, query: &str, timeout: Option<u64>) -> Result<()> {
    let session = Session::open(paths).await?;
    let mut job = session.find(query).await?;

    if job.qtype == QueueType::Local
        && job.is_submitted()
        && !job.state.is_terminal()
        && session.cluster.owned_local_id(&job).await.is_none()
    {
        anyhow::bail!(
            "Job {} ran in another fyrd process and cannot be followed from here",
            job.name
        );
    }

    let spinner = spinner(format!("Waiting for {}...", job.name))?;
    let result = session
        .cluster
        .wait(&mut job, timeout.map(Duration::from_secs))
        .await;
    spinner.finish_and_clear();
    session.store.save_job(&job).await?;

    if let Err(e) = result {
        anyhow::bail!(
            "{e}. Use 'fyrd status {}' to check later.",
            job.id.short()
        );
    }
    print_state(&job);
    Ok(())
}
