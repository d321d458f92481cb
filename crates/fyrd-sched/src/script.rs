//! Script generation and parsing of tracked output.
//!
//! Every job runs through a tracked bash script that prints a start timestamp and
//! the job name before the command, and `Done` plus an end timestamp after it. The
//! timestamps let [`parse_tracked_output`] recover run times and strip the markers
//! from the captured STDOUT.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobKind, JobScripts, QueueType};
use crate::options::render_directives;

/// Timestamp format written by the tracked script, `date +'%y-%m-%d-%H:%M:%S'`.
pub const TIME_FORMAT: &str = "%y-%m-%d-%H:%M:%S";

/// A generated file and its content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub path: PathBuf,
    pub content: String,
}

impl Script {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Write the file, creating its directory.
    ///
    /// An existing file is only replaced when `overwrite` is set.
    pub async fn write(&self, overwrite: bool) -> SchedResult<()> {
        if !overwrite && self.exists().await {
            return Err(SchedError::IoError(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", self.path.display()),
            )));
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, &self.content).await?;
        tracing::trace!("Wrote {}", self.path.display());
        Ok(())
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Remove the file. A missing file is not an error.
    pub async fn remove(&self) -> SchedResult<bool> {
        remove_if_exists(&self.path).await
    }
}

pub(crate) async fn remove_if_exists(path: &Path) -> SchedResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SchedError::IoError(e)),
    }
}

/// Quote a string for bash when it contains anything but safe characters.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=+,@%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Path of the interpreter-side runner for a function job.
pub fn function_runner_path(scriptpath: &Path, name: &str, suffix: &str) -> PathBuf {
    scriptpath.join(format!("{name}_func.{suffix}.py"))
}

fn function_input_path(scriptpath: &Path, name: &str, suffix: &str) -> PathBuf {
    scriptpath.join(format!("{name}_func.{suffix}.args.json"))
}

/// Generate every file a job needs.
pub fn generate(job: &Job) -> SchedResult<JobScripts> {
    let suffix = job.suffix();
    let path = |ext: &str| job.scriptpath.join(format!("{}.{}{}", job.name, suffix, ext));

    let (function, function_input) = match &job.kind {
        JobKind::Function(call) => {
            let input = function_input_path(&job.scriptpath, &job.name, &suffix);
            let output = job
                .function_output
                .as_deref()
                .ok_or_else(|| SchedError::Internal("function job without output file".into()))?;
            let payload = serde_json::json!({ "args": call.args, "kwargs": call.kwargs });
            let runner = function_runner(&call.function, &job.name, &job.options.imports(), &input, output)?;
            (
                Some(Script::new(
                    function_runner_path(&job.scriptpath, &job.name, &suffix),
                    runner,
                )),
                Some(Script::new(input, serde_json::to_string_pretty(&payload)?)),
            )
        }
        JobKind::Script { .. } => (None, None),
    };

    let directives = render_directives(&job.options, job.qtype, &job.name, &job.outfile, &job.errfile);
    let body = tracked_body(&job.name, &job.runpath, &job.options.modules(), &job.command());

    let (submission, exec) = match job.qtype {
        QueueType::Slurm => {
            let exec_path = path(".script");
            let quoted = shell_quote(&exec_path.to_string_lossy());
            let mut wrapper = script_header(&directives);
            wrapper.push_str(&format!(
                "if [ ! -f {quoted} ]; then\n    echo {quoted} does not exist >&2\n    exit 1\nfi\nsrun bash {quoted}\n"
            ));
            (
                Script::new(path(".sbatch"), wrapper),
                Some(Script::new(exec_path, format!("{}{body}", script_header(&[])))),
            )
        }
        QueueType::Torque => (
            Script::new(path(".qsub"), format!("{}{body}", script_header(&directives))),
            None,
        ),
        QueueType::Local => (
            Script::new(path(""), format!("{}{body}", script_header(&[]))),
            None,
        ),
    };

    Ok(JobScripts {
        submission,
        exec,
        function,
        function_input,
    })
}

fn script_header(directives: &[String]) -> String {
    let mut header = String::from("#!/bin/bash\n");
    for line in directives {
        header.push_str(line);
        header.push('\n');
    }
    header
}

/// The tracked part of a job script, run by bash.
pub fn tracked_body(name: &str, rundir: &Path, modules: &[String], command: &str) -> String {
    let mut body = String::new();
    for module in modules {
        body.push_str(&format!("module load {}\n", shell_quote(module)));
    }
    body.push_str(&format!(
        r#"mkdir -p $LOCAL_SCRATCH > /dev/null 2>/dev/null
cd {rundir}
date +'{TIME_FORMAT}'
echo "Running {name}"
{command}
exitcode=$?
echo Done
date +'{TIME_FORMAT}'
if [[ $exitcode != 0 ]]; then
    echo "Exited with code: $exitcode" >&2
fi
exit $exitcode
"#,
        rundir = shell_quote(&rundir.to_string_lossy()),
        command = command.trim_end(),
    ));
    body
}

fn py_str(s: &str) -> SchedResult<String> {
    Ok(serde_json::to_string(s)?)
}

/// Python runner that calls `function` with the JSON arguments in `input` and writes
/// `{"ok": result}` or `{"error": message}` to `output`.
pub fn function_runner(
    function: &str,
    name: &str,
    imports: &[String],
    input: &Path,
    output: &Path,
) -> SchedResult<String> {
    let mut import_lines = String::new();
    for import in imports {
        let statement = if import.starts_with("import ") || import.starts_with("from ") {
            import.clone()
        } else {
            format!("import {import}")
        };
        import_lines.push_str(&format!("    {statement}\n"));
    }
    if import_lines.is_empty() {
        import_lines.push_str("    pass\n");
    }

    Ok(format!(
        r#""""Call {function} for job {name}."""
import builtins
import importlib
import json
import sys

_import_error = None
try:
{import_lines}except Exception as err:
    _import_error = err


def _resolve(path):
    module, _, attr = path.rpartition(".")
    if not module:
        if attr in globals():
            return globals()[attr]
        return getattr(builtins, attr)
    try:
        target = importlib.import_module(module)
    except ImportError:
        target = _resolve(module)
    return getattr(target, attr)


with open({input}) as fin:
    payload = json.load(fin)

try:
    if _import_error is not None:
        raise _import_error
    function = _resolve({function_literal})
    result = {{"ok": function(*payload["args"], **payload["kwargs"])}}
except Exception as err:
    result = {{"error": "{{}}: {{}}".format(type(err).__name__, err)}}

with open({output}, "w") as fout:
    json.dump(result, fout, default=repr)

if "error" in result:
    sys.stderr.write(result["error"] + "\n")
    sys.exit(1)
"#,
        input = py_str(&input.to_string_lossy())?,
        output = py_str(&output.to_string_lossy())?,
        function_literal = py_str(function)?,
    ))
}

/// STDOUT of a tracked script with the markers removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedOutput {
    pub started: Option<NaiveDateTime>,
    pub finished: Option<NaiveDateTime>,
    pub body: String,
}

impl TrackedOutput {
    /// Wall-clock run time, when both timestamps were found.
    pub fn runtime(&self) -> Option<chrono::Duration> {
        Some(self.finished? - self.started?)
    }
}

fn parse_stamp(line: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(line.trim(), TIME_FORMAT).ok()
}

/// Split tracked STDOUT into timestamps and the command's own output.
///
/// Output without markers (e.g. from a job that was killed early) is returned as is.
pub fn parse_tracked_output(text: &str) -> TrackedOutput {
    let lines: Vec<&str> = text.lines().collect();
    let mut start = 0;
    let mut end = lines.len();

    let started = lines.first().and_then(|l| parse_stamp(l));
    if started.is_some() {
        start = 1;
        if lines.get(1).is_some_and(|l| l.starts_with("Running ")) {
            start = 2;
        }
    }

    let finished = if end > start {
        lines.last().and_then(|l| parse_stamp(l))
    } else {
        None
    };
    if finished.is_some() {
        end -= 1;
        if end > start && lines[end - 1].trim() == "Done" {
            end -= 1;
        }
    }

    let mut body = lines[start..end].join("\n");
    if !body.is_empty() {
        body.push('\n');
    }

    TrackedOutput {
        started,
        finished,
        body,
    }
}

/// File name endings of generated scripts.
fn script_endings(suffix: &str, qtype: Option<QueueType>) -> Vec<String> {
    let mut endings = vec![format!("_func.{suffix}.py"), format!("_func.{suffix}.args.json")];
    let backends = match qtype {
        Some(qtype) => vec![qtype],
        None => vec![QueueType::Slurm, QueueType::Torque, QueueType::Local],
    };
    for backend in backends {
        match backend {
            QueueType::Slurm => {
                endings.push(format!(".{suffix}.sbatch"));
                endings.push(format!(".{suffix}.script"));
            }
            QueueType::Torque => endings.push(format!(".{suffix}.qsub")),
            QueueType::Local => endings.push(format!(".{suffix}")),
        }
    }
    endings
}

fn output_endings(suffix: &str) -> Vec<String> {
    vec![
        format!(".{suffix}.out"),
        format!(".{suffix}.err"),
        format!(".{suffix}.out.func.json"),
    ]
}

/// Delete generated files in `dir`, and output files too when `delete_outputs` is set.
///
/// `qtype` limits which backend's scripts are removed; `None` removes all of them.
pub async fn clean_dir(
    dir: &Path,
    suffix: &str,
    qtype: Option<QueueType>,
    delete_outputs: bool,
) -> SchedResult<Vec<PathBuf>> {
    let mut endings = script_endings(suffix, qtype);
    if delete_outputs {
        endings.extend(output_endings(suffix));
    }

    let mut removed = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if endings.iter().any(|ending| file_name.ends_with(ending.as_str()))
            && remove_if_exists(&path).await?
        {
            removed.push(path);
        }
    }

    removed.sort();
    tracing::info!("Removed {} files from {}", removed.len(), dir.display());
    Ok(removed)
}
