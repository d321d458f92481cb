//! Parsers for Torque command output.

use crate::error::{SchedError, SchedResult};
use crate::torque::adapter::{TorqueJobInfo, TorqueState};

/// Parse qsub output to extract job ID.
///
/// Torque prints `<number>.<server>`, some setups print only the number.
pub fn parse_qsub_output(output: &str) -> SchedResult<String> {
    let trimmed = output.trim();

    let number = trimmed.split('.').next().unwrap_or_default();
    if !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
        && !trimmed.contains(char::is_whitespace)
    {
        return Ok(trimmed.to_string());
    }

    Err(SchedError::TorqueCommandError {
        command: "qsub".to_string(),
        message: format!("Unexpected output format: {}", trimmed),
    })
}

/// Turn a failed qsub's STDERR into an error.
///
/// `qsub: submit error (<reason>)` is reduced to the reason.
pub fn parse_qsub_error(stderr: &str) -> SchedError {
    let stderr = stderr.trim();
    if let Some(rest) = stderr.strip_prefix("qsub: submit error (") {
        let reason = rest.rsplit_once(')').map_or(rest, |(reason, _)| reason);
        return SchedError::TorqueSubmitError(reason.trim().to_string());
    }
    SchedError::TorqueSubmitError(stderr.to_string())
}

/// Parse qstat full output (-f flag) to extract job information.
///
/// qstat -f output format:
/// ```text
/// Job Id: 12345.torque-server
///     Job_Name = my_job
///     job_state = R
///     queue = batch
///     exit_status = 0
/// ```
pub fn parse_qstat_full_output(output: &str) -> SchedResult<Option<TorqueJobInfo>> {
    if output.trim().is_empty() {
        return Ok(None);
    }

    let mut job_id = String::new();
    let mut name = String::new();
    let mut state = TorqueState::Unknown(String::new());
    let mut queue = None;
    let mut exit_status = None;

    for line in output.lines() {
        let line = line.trim();

        if let Some(id) = line.strip_prefix("Job Id:") {
            job_id = id.trim().to_string();
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            match key.trim() {
                "Job_Name" => name = value.to_string(),
                "job_state" => state = parse_pbs_state(value),
                "queue" => queue = Some(value.to_string()),
                // Torque spells it exit_status, PBS Pro Exit_status
                "exit_status" | "Exit_status" => exit_status = value.parse().ok(),
                _ => {}
            }
        }
    }

    if job_id.is_empty() {
        return Ok(None);
    }

    Ok(Some(TorqueJobInfo {
        job_id,
        name,
        state,
        queue,
        exit_status,
    }))
}

/// Parse a Torque state string.
pub fn parse_pbs_state(state: &str) -> TorqueState {
    match state.to_uppercase().as_str() {
        "Q" | "QUEUED" => TorqueState::Queued,
        "R" | "RUNNING" => TorqueState::Running,
        "E" | "EXITING" => TorqueState::Exiting,
        "C" | "COMPLETED" | "F" | "FINISHED" => TorqueState::Completed,
        "H" | "HELD" => TorqueState::Held,
        "W" | "WAITING" => TorqueState::Waiting,
        "S" | "SUSPENDED" => TorqueState::Suspended,
        "T" | "TRANSIT" => TorqueState::Transit,
        _ => TorqueState::Unknown(state.to_string()),
    }
}

/// Parse qdel output to verify deletion.
pub fn parse_qdel_output(output: &str, stderr: &str) -> SchedResult<()> {
    // qdel typically produces no output on success
    if stderr.contains("Unknown Job Id") || stderr.contains("does not exist") {
        return Err(SchedError::TorqueJobNotFound(
            "Job not found or already completed".to_string(),
        ));
    }

    if stderr.contains("Unauthorized") || stderr.contains("permission denied") {
        return Err(SchedError::TorqueCommandError {
            command: "qdel".to_string(),
            message: "Permission denied".to_string(),
        });
    }

    let stderr = stderr.trim();
    if !stderr.is_empty()
        && !stderr.contains("being deleted")
        && !stderr.contains("has already finished")
    {
        return Err(SchedError::TorqueCommandError {
            command: "qdel".to_string(),
            message: stderr.to_string(),
        });
    }

    let _ = output;
    Ok(())
}

/// Job ids from `qstat -u <user>`.
///
/// Header and separator lines are skipped by keeping only lines whose first field
/// starts with a digit.
pub fn parse_queue_ids(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|first| first.starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qsub_output() {
        assert_eq!(
            parse_qsub_output("12345.torque-server\n").unwrap(),
            "12345.torque-server"
        );
        assert_eq!(
            parse_qsub_output("999999.cluster.local").unwrap(),
            "999999.cluster.local"
        );
        assert_eq!(parse_qsub_output("12345").unwrap(), "12345");
    }

    #[test]
    fn test_parse_qsub_output_error() {
        assert!(parse_qsub_output("qsub: Unknown queue").is_err());
        assert!(parse_qsub_output("").is_err());
    }

    #[test]
    fn test_parse_qsub_error() {
        let err = parse_qsub_error(
            "qsub: submit error (Job exceeds queue resource limits MSG=cannot satisfy queue max walltime requirement)\n",
        );
        match err {
            SchedError::TorqueSubmitError(message) => assert_eq!(
                message,
                "Job exceeds queue resource limits MSG=cannot satisfy queue max walltime requirement"
            ),
            other => panic!("unexpected error: {other}"),
        }

        let err = parse_qsub_error("qsub: Unknown queue MSG=cannot locate queue");
        assert!(matches!(err, SchedError::TorqueSubmitError(m) if m.contains("Unknown queue")));
    }

    #[test]
    fn test_parse_qstat_full_output() {
        let output = r#"Job Id: 12345.torque-server
    Job_Name = align.1a2b3c4d
    job_state = R
    queue = batch
    resources_used.walltime = 00:05:23
"#;
        let info = parse_qstat_full_output(output).unwrap().unwrap();
        assert_eq!(info.job_id, "12345.torque-server");
        assert_eq!(info.name, "align.1a2b3c4d");
        assert!(matches!(info.state, TorqueState::Running));
        assert_eq!(info.queue, Some("batch".to_string()));
    }

    #[test]
    fn test_parse_qstat_full_output_completed() {
        let output = r#"Job Id: 12345.torque-server
    Job_Name = completed_job
    job_state = C
    queue = batch
    exit_status = 2
"#;
        let info = parse_qstat_full_output(output).unwrap().unwrap();
        assert!(matches!(info.state, TorqueState::Completed));
        assert_eq!(info.exit_status, Some(2));
    }

    #[test]
    fn test_parse_qstat_full_output_empty() {
        assert!(parse_qstat_full_output("").unwrap().is_none());
        assert!(parse_qstat_full_output("garbage\n").unwrap().is_none());
    }

    #[test]
    fn test_parse_pbs_state() {
        assert!(matches!(parse_pbs_state("Q"), TorqueState::Queued));
        assert!(matches!(parse_pbs_state("R"), TorqueState::Running));
        assert!(matches!(parse_pbs_state("E"), TorqueState::Exiting));
        assert!(matches!(parse_pbs_state("C"), TorqueState::Completed));
        assert!(matches!(parse_pbs_state("H"), TorqueState::Held));
        assert!(matches!(parse_pbs_state("W"), TorqueState::Waiting));
        assert!(matches!(parse_pbs_state("S"), TorqueState::Suspended));
        assert!(matches!(parse_pbs_state("unknown"), TorqueState::Unknown(_)));
    }

    #[test]
    fn test_parse_qdel_output() {
        assert!(parse_qdel_output("", "").is_ok());
        assert!(parse_qdel_output("", "Job being deleted").is_ok());
        assert!(matches!(
            parse_qdel_output("", "qdel: Unknown Job Id 12345.server"),
            Err(SchedError::TorqueJobNotFound(_))
        ));
        assert!(parse_qdel_output("", "Unauthorized request").is_err());
    }

    #[test]
    fn test_parse_queue_ids() {
        let output = r#"
torque-server:
                                                                         Req'd    Req'd       Elap
Job ID                  Username    Queue    Jobname          SessID  NDS   TSK   Memory   Time    S   Time
----------------------- ----------- -------- ---------------- ------ ----- ------ ------ --------- - ---------
101.torque-server       me          batch    align.1a2b3c4d      --      1      1  4000mb  12:00:00 Q       --
102.torque-server       me          batch    sort.5e6f7a8b    4242      1      1  4000mb  12:00:00 R  00:01:02
"#;
        assert_eq!(
            parse_queue_ids(output),
            vec!["101.torque-server", "102.torque-server"]
        );
    }
}
