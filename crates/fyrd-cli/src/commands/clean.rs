//! Clean command implementation.
//!
//! Delete generated scripts, either of one job or of every job in a directory.

use std::path::Path;

use anyhow::Result;
use console::style;

use fyrd_sched::script;

use super::common::{Paths, Session, clean_dir_default, load_config};

/// Execute the clean command.
pub async fn execute(
    paths: &Paths,
    job: Option<&str>,
    dir: Option<&Path>,
    outputs: bool,
) -> Result<()> {
    let removed = match job {
        Some(query) => {
            let session = Session::open(paths).await?;
            let job = session.find(query).await?;
            session.cluster.clean(&job, outputs).await?
        }
        None => {
            let config = load_config(paths)?;
            let dir = clean_dir_default(dir)?;
            script::clean_dir(&dir, &config.jobs.suffix, None, outputs).await?
        }
    };

    for path in &removed {
        println!("  {}", style(path.display()).dim());
    }
    println!(
        "{} Removed {} file(s)",
        style("✓").green().bold(),
        removed.len()
    );
    Ok(())
}
