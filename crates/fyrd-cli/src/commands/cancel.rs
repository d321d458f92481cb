//! Cancel command implementation.

use anyhow::Result;
use console::style;

use fyrd_sched::StateStore;

use super::common::{Paths, Session};

/// Execute the cancel command.
pub async fn execute(paths: &Paths, query: &str) -> Result<()> {
    let session = Session::open(paths).await?;
    let mut job = session.find(query).await?;

    session.cluster.cancel(&mut job).await?;
    session.store.save_job(&job).await?;

    println!(
        "{} Cancelled {}",
        style("✓").green().bold(),
        style(&job.name).cyan()
    );
    Ok(())
}
