//! Output command implementation.

use anyhow::Result;

use fyrd_sched::JobKind;

use super::common::{Paths, Session};

/// Execute the output command.
pub async fn execute(paths: &Paths, query: &str, stderr: bool) -> Result<()> {
    let session = Session::open(paths).await?;
    let job = session.find(query).await?;

    if stderr {
        eprint!("{}", session.cluster.stderr(&job).await?);
        return Ok(());
    }

    print!("{}", session.cluster.stdout(&job).await?);
    if let JobKind::Function(_) = job.kind {
        let value = session.cluster.function_output(&job).await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
