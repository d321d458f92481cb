//! Queue command implementation.

use anyhow::Result;
use console::style;

use fyrd_sched::QueueType;

use super::common::{Paths, Session};

/// Execute the queue command.
pub async fn execute(paths: &Paths, qtype: Option<&str>) -> Result<()> {
    let session = Session::open(paths).await?;
    let qtype = match qtype {
        Some(name) => name.parse::<QueueType>()?,
        None => session.config.qtype()?,
    };

    let len = session.cluster.queue_len(qtype).await?;
    println!(
        "{} {} job(s) in the {} queue (limit {})",
        style("→").cyan().bold(),
        style(len).yellow(),
        qtype,
        session.config.queue.max_jobs
    );
    Ok(())
}
