//! Rendering options as scheduler directives and help text.

use std::fmt::Write as _;
use std::path::Path;

use super::{JobOptions, OptionTable};
use crate::job::QueueType;

/// Render the directive lines for a submission script.
///
/// Local jobs have no directives; their options are consumed by the executor.
pub fn render_directives(
    opts: &JobOptions,
    qtype: QueueType,
    job_name: &str,
    outfile: &Path,
    errfile: &Path,
) -> Vec<String> {
    match qtype {
        QueueType::Slurm => slurm_directives(opts, job_name, outfile, errfile),
        QueueType::Torque => torque_directives(opts, job_name, outfile, errfile),
        QueueType::Local => Vec::new(),
    }
}

fn slurm_directives(opts: &JobOptions, job_name: &str, outfile: &Path, errfile: &Path) -> Vec<String> {
    let mut lines = vec![
        format!("#SBATCH --job-name={job_name}"),
        "#SBATCH --ntasks 1".to_string(),
        format!("#SBATCH --nodes {}", opts.nodes()),
        format!("#SBATCH --cpus-per-task {}", opts.cores()),
    ];

    if let Some(time) = opts.walltime() {
        lines.push(format!("#SBATCH --time={}", time.to_slurm()));
    }
    if let Some(mem) = opts.mem_mb() {
        lines.push(format!("#SBATCH --mem={mem}"));
    }
    if let Some(partition) = opts.string("partition") {
        lines.push(format!("#SBATCH -p {partition}"));
    }
    if let Some(account) = opts.string("account") {
        lines.push(format!("#SBATCH --account={account}"));
    }
    let features = opts.features();
    if !features.is_empty() {
        lines.push(format!("#SBATCH --constraint={}", features.join("&")));
    }
    if let Some(export) = opts.get("export") {
        lines.push(format!("#SBATCH --export={export}"));
    }
    if let Some(begin) = opts.string("begin") {
        lines.push(format!("#SBATCH --begin={begin}"));
    }

    lines.push(format!("#SBATCH -o {}", outfile.display()));
    lines.push(format!("#SBATCH -e {}", errfile.display()));
    lines
}

fn torque_directives(opts: &JobOptions, job_name: &str, outfile: &Path, errfile: &Path) -> Vec<String> {
    let mut resources = format!("nodes={}:ppn={}", opts.nodes(), opts.cores());
    for feature in opts.features() {
        resources.push(':');
        resources.push_str(&feature);
    }

    let mut lines = vec![
        format!("#PBS -N {job_name}"),
        format!("#PBS -l {resources}"),
    ];

    if let Some(time) = opts.walltime() {
        lines.push(format!("#PBS -l walltime={time}"));
    }
    if let Some(mem) = opts.mem_mb() {
        lines.push(format!("#PBS -l mem={mem}MB"));
    }
    if let Some(queue) = opts.string("partition") {
        lines.push(format!("#PBS -q {queue}"));
    }
    if let Some(account) = opts.string("account") {
        lines.push(format!("#PBS -A {account}"));
    }
    if let Some(export) = opts.get("export") {
        lines.push(format!("#PBS -v {export}"));
    }
    if let Some(begin) = opts.string("begin") {
        lines.push(format!("#PBS -a {begin}"));
    }

    lines.push(format!("#PBS -o {}", outfile.display()));
    lines.push(format!("#PBS -e {}", errfile.display()));
    lines
}

/// Formatted table of every option in `table`.
pub fn option_help(table: OptionTable) -> String {
    let specs: Vec<_> = table.specs().collect();
    let width = specs.iter().map(|s| s.name.len()).max().unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<width$}  {:<6}  {:<8}  DESCRIPTION",
        "OPTION", "TYPE", "DEFAULT"
    );
    for spec in specs {
        let _ = write!(
            out,
            "{:<width$}  {:<6}  {:<8}  {}",
            spec.name,
            spec.kind.name(),
            spec.default.to_string(),
            spec.help
        );
        if !spec.aliases.is_empty() {
            let _ = write!(out, " (aliases: {})", spec.aliases.join(", "));
        }
        out.push('\n');
    }
    out
}
