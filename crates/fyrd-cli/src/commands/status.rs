//! Status command implementation.
//!
//! Refresh job states from their backends and print them.

use anyhow::Result;
use chrono::Local;
use console::style;

use fyrd_sched::{Job, JobFilter, QueueType, StateStore};

use super::common::{Paths, Session, styled_state};

/// Execute the status command.
pub async fn execute(paths: &Paths, job: Option<&str>, all: bool) -> Result<()> {
    let session = Session::open(paths).await?;

    if let Some(query) = job {
        let mut job = session.find(query).await?;
        refresh(&session, &mut job).await?;
        print_details(&job);
        if is_foreign_local(&session, &job).await {
            println!(
                "  {}",
                style("Local job of another fyrd process, state as last recorded").dim()
            );
        }
        return Ok(());
    }

    let filter = if all {
        JobFilter::default()
    } else {
        JobFilter::active()
    };
    let mut jobs = session.store.list_jobs(&filter).await?;

    if jobs.is_empty() {
        if all {
            println!("No jobs found.");
        } else {
            println!("No active jobs. Use --all to include finished jobs.");
        }
        return Ok(());
    }

    for job in &mut jobs {
        refresh(&session, job).await?;
    }

    println!("{} {} job(s):\n", style("→").cyan().bold(), jobs.len());

    // Table header
    println!(
        "  {:<8}  {:<28}  {:<7}  {:<20}  {:<13}  {}",
        style("ID").bold(),
        style("NAME").bold(),
        style("QUEUE").bold(),
        style("QUEUE ID").bold(),
        style("STATE").bold(),
        style("CREATED").bold()
    );
    println!("  {}", "-".repeat(100));

    for job in &jobs {
        println!(
            "  {:<8}  {:<28}  {:<7}  {:<20}  {:<13}  {}",
            style(job.id.short()).dim(),
            job.name,
            job.qtype,
            job.queue_id.as_deref().unwrap_or("-"),
            styled_state(job.state),
            job.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        );
    }

    Ok(())
}

/// Active local job whose pool lives in another process.
async fn is_foreign_local(session: &Session, job: &Job) -> bool {
    job.qtype == QueueType::Local
        && job.state.is_active()
        && session.cluster.owned_local_id(job).await.is_none()
}

/// Ask the backend for a fresh state and save it when it changed.
///
/// Local jobs of other processes keep their recorded state.
async fn refresh(session: &Session, job: &mut Job) -> Result<()> {
    if !job.state.is_active() {
        return Ok(());
    }
    let before = job.state;
    match session.cluster.update(job).await {
        Ok(state) if state != before => session.store.save_job(job).await?,
        Ok(_) => {}
        Err(e) => tracing::warn!("Could not update {}: {}", job.name, e),
    }
    Ok(())
}

fn print_details(job: &Job) {
    println!(
        "{} Job {} status: {}",
        style("→").cyan().bold(),
        style(&job.name).cyan(),
        styled_state(job.state).bold()
    );
    println!("  ID:        {}", style(job.id).dim());
    println!("  Backend:   {}", job.qtype);
    if let Some(queue_id) = &job.queue_id {
        println!("  Queue ID:  {}", style(queue_id).yellow());
    }
    if !job.dependencies.is_empty() {
        println!("  Depends:   {}", job.dependencies.join(", "));
    }
    if let Some(code) = job.exit_code {
        println!("  Exit code: {code}");
    }
    println!("  STDOUT:    {}", job.outfile.display());
    println!("  STDERR:    {}", job.errfile.display());
    if let Some(submitted) = job.submitted_at {
        println!(
            "  Submitted: {}",
            submitted.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(completed) = job.completed_at {
        println!(
            "  Finished:  {}",
            completed.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
}
