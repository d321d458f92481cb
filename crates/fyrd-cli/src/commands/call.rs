//! Call command implementation.
//!
//! Submit a function call with JSON arguments as a job.

use anyhow::{Context, Result};
use serde_json::Value;

use fyrd_sched::options::{parse_assignment, spec};
use fyrd_sched::{FunctionCall, Job, JobOptions, OptionTable};

use super::common::{Paths, Session, build_job, run_job};
use crate::JobArgs;

/// Execute the call command.
pub async fn execute(
    paths: &Paths,
    function: &str,
    args: &[String],
    kwargs: &[String],
    imports: &[String],
    job_args: &JobArgs,
) -> Result<()> {
    let session = Session::open(paths).await?;

    let mut call = FunctionCall::new(function).with_args(args.iter().map(|a| json_arg(a)));
    for raw in kwargs {
        let (key, value) =
            parse_assignment(raw).with_context(|| format!("Invalid keyword argument '{raw}'"))?;
        call = call.with_kwarg(key, json_arg(&value));
    }

    let (imports, options) = merge_imports(imports, &job_args.options)?;
    let job_args = JobArgs {
        options,
        ..job_args.clone()
    };

    let mut builder = Job::function(call);
    if !imports.is_empty() {
        builder = builder.option("imports", imports);
    }

    let job = build_job(&session.config, builder, &job_args)?;
    run_job(&session, job, &job_args).await
}

/// Pull `imports` out of the `-o` assignments and add the `--import` statements.
///
/// Each `--import` is kept whole, so `from os import path, sep` stays one statement.
/// Returns the imports and the remaining assignments.
pub fn merge_imports(imports: &[String], options: &[String]) -> Result<(Vec<String>, Vec<String>)> {
    let mut merged: Vec<String> = Vec::new();
    let mut rest = Vec::new();
    for raw in options {
        let (key, value) = parse_assignment(raw)?;
        if spec(OptionTable::Function, &key).is_some_and(|s| s.name == "imports") {
            let mut parsed = JobOptions::new(OptionTable::Function);
            parsed.set("imports", value)?;
            merged.extend(parsed.imports());
        } else {
            rest.push(raw.clone());
        }
    }
    merged.extend(imports.iter().map(|i| i.trim().to_string()));

    let mut unique = Vec::with_capacity(merged.len());
    for import in merged {
        if !import.is_empty() && !unique.contains(&import) {
            unique.push(import);
        }
    }
    Ok((unique, rest))
}

/// Parse an argument as JSON, falling back to a plain string.
pub fn json_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
