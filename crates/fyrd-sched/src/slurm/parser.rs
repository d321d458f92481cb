//! Readers for sbatch, squeue, sacct and scancel output.

use crate::error::{SchedError, SchedResult};
use crate::slurm::adapter::{SlurmJobInfo, SlurmState};

fn malformed(command: &str, line: &str) -> SchedError {
    SchedError::SlurmCommandError {
        command: command.to_string(),
        message: format!("Unexpected output format: {line}"),
    }
}

/// Split a `|` separated row, trimming each field.
fn fields(line: &str) -> Vec<&str> {
    line.split('|').map(str::trim).collect()
}

/// Column headers printed by squeue and sacct start with the job id column.
fn is_header(line: &str) -> bool {
    let first = line.split('|').next().unwrap_or_default().trim();
    first.eq_ignore_ascii_case("jobid")
}

/// Queue id from sbatch.
///
/// Both `Submitted batch job 48213` and the `--parsable` form `48213;hpc` are read.
pub fn parse_sbatch_output(output: &str) -> SchedResult<String> {
    let trimmed = output.trim();
    let id = trimmed
        .strip_prefix("Submitted batch job ")
        .unwrap_or(trimmed)
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();

    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("sbatch", trimmed));
    }
    Ok(id.to_string())
}

/// First job row of `squeue -j <id> -o "%i|%j|%T|%r|%S"`.
///
/// ```text
/// JOBID|NAME|STATE|REASON|START_TIME
/// 48213|align.1a2b3c4d|PENDING|Priority|N/A
/// ```
///
/// `None` once the job has left the queue.
pub fn parse_squeue_output(output: &str) -> SchedResult<Option<SlurmJobInfo>> {
    let Some(row) = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !is_header(line))
    else {
        return Ok(None);
    };

    let cols = fields(row);
    let [id, name, state, reason, ..] = cols.as_slice() else {
        return Err(malformed("squeue", row));
    };

    Ok(Some(SlurmJobInfo {
        job_id: id.to_string(),
        name: name.to_string(),
        state: parse_slurm_state(state),
        reason: match *reason {
            "" | "None" => None,
            other => Some(other.to_string()),
        },
        exit_code: None,
    }))
}

/// Accounting row of `sacct -j <id> -o JobID,JobName,State,ExitCode -P`.
///
/// ```text
/// JobID|JobName|State|ExitCode
/// 48213|align.1a2b3c4d|COMPLETED|0:0
/// 48213.batch|batch|COMPLETED|0:0
/// 48213.0|bash|COMPLETED|0:0
/// ```
///
/// Step rows (`48213.batch`, `48213.0`) are ignored.
pub fn parse_sacct_output(output: &str) -> SchedResult<Option<SlurmJobInfo>> {
    let row = output
        .lines()
        .filter(|line| !is_header(line))
        .map(fields)
        .find(|cols| cols.len() >= 4 && !cols[0].is_empty() && !cols[0].contains('.'));

    Ok(row.map(|cols| SlurmJobInfo {
        job_id: cols[0].to_string(),
        name: cols[1].to_string(),
        state: parse_slurm_state(cols[2]),
        reason: None,
        exit_code: parse_exit_code(cols[3]),
    }))
}

/// State names and squeue's short codes.
///
/// Only the first word is read, sacct writes `CANCELLED by 1000`.
fn parse_slurm_state(state: &str) -> SlurmState {
    let word = state.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
    match word.as_str() {
        "PENDING" | "PD" => SlurmState::Pending,
        "RUNNING" | "R" => SlurmState::Running,
        "COMPLETING" | "CG" => SlurmState::Completing,
        "COMPLETED" | "CD" => SlurmState::Completed,
        "FAILED" | "F" => SlurmState::Failed,
        "TIMEOUT" | "TO" => SlurmState::Timeout,
        "CANCELLED" | "CA" => SlurmState::Cancelled,
        "NODE_FAIL" | "NF" => SlurmState::NodeFail,
        "PREEMPTED" | "PR" => SlurmState::Preempted,
        "OUT_OF_MEMORY" | "OOM" => SlurmState::OutOfMemory,
        "SUSPENDED" | "S" => SlurmState::Suspended,
        _ => SlurmState::Unknown(state.to_string()),
    }
}

/// `code:signal` to the exit code.
fn parse_exit_code(code: &str) -> Option<i32> {
    code.split_once(':').map_or(code, |(c, _)| c).parse().ok()
}

/// scancel is silent on success. A job that already finished is reported as not found.
pub fn parse_scancel_output(_stdout: &str, stderr: &str) -> SchedResult<()> {
    let stderr = stderr.trim();
    if stderr.is_empty() || stderr.contains("already completing") {
        return Ok(());
    }
    if stderr.contains("Invalid job id") || stderr.contains("does not exist") {
        return Err(SchedError::SlurmJobNotFound(stderr.to_string()));
    }
    Err(SchedError::SlurmCommandError {
        command: "scancel".to_string(),
        message: stderr.to_string(),
    })
}

/// Ids from `squeue -h -u <user> -o %i`, one per line.
pub fn parse_queue_ids(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
