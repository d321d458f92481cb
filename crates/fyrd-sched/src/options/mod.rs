//! Keyword registry for job options.
//!
//! Every keyword accepted by [`JobBuilder`](crate::job::JobBuilder) is declared here
//! with its kind, its default and a one-line description. Two tables exist: one for
//! plain script jobs and one for function-call jobs. They share most keywords and
//! differ only in a few defaults (`threads`) and in `imports`, which only function
//! jobs understand.
//!
//! # Example
//!
//! ```ignore
//! use fyrd_sched::options::{JobOptions, OptionTable};
//!
//! let mut opts = JobOptions::new(OptionTable::Job);
//! opts.set("cpus", 4)?;            // alias of `cores`
//! opts.set("mem", "8GB")?;         // stored as 8192 MB
//! opts.set("walltime", "1-00:00:00")?;
//! assert_eq!(opts.cores(), 4);
//! ```

mod render;
mod value;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};

pub use render::{option_help, render_directives};
pub use value::{OptionValue, Walltime, parse_memory_mb};

/// Kind of value an option accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Positive integer.
    Int,
    /// Free-form string.
    Str,
    /// List of strings, from an array or a comma separated string.
    StrList,
    /// Memory in MB, from an integer or a string with a unit.
    Memory,
    /// Walltime as `[D-]HH:MM:SS`.
    Time,
    /// Boolean flag.
    Bool,
    /// Filesystem path.
    Path,
}

impl OptionKind {
    /// Short name used in help output.
    pub fn name(&self) -> &'static str {
        match self {
            OptionKind::Int => "int",
            OptionKind::Str => "str",
            OptionKind::StrList => "list",
            OptionKind::Memory => "memory",
            OptionKind::Time => "time",
            OptionKind::Bool => "bool",
            OptionKind::Path => "path",
        }
    }
}

/// Declared default of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionDefault {
    /// No default, the option is simply absent.
    None,
    Int(u64),
    Str(&'static str),
    Bool(bool),
}

impl fmt::Display for OptionDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionDefault::None => write!(f, "None"),
            OptionDefault::Int(n) => write!(f, "{n}"),
            OptionDefault::Str(s) => write!(f, "{s}"),
            OptionDefault::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Which backends consume an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliesTo {
    /// Used by every backend.
    All,
    /// Rendered as a SLURM or Torque directive, ignored locally.
    Batch,
    /// Only meaningful for local execution.
    Local,
    /// Only meaningful for function-call jobs.
    Function,
}

/// Table an option set is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionTable {
    /// Plain script jobs.
    Job,
    /// Function-call jobs.
    Function,
}

impl OptionTable {
    /// All options of this table, in declaration order.
    pub fn specs(self) -> impl Iterator<Item = OptionSpec> {
        OPTIONS.iter().filter_map(move |row| row.spec(self))
    }

    /// Look up an option by name or alias.
    pub fn spec(self, name: &str) -> Option<OptionSpec> {
        spec(self, name)
    }
}

impl fmt::Display for OptionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionTable::Job => write!(f, "job"),
            OptionTable::Function => write!(f, "function"),
        }
    }
}

/// A single option as seen from one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub default: OptionDefault,
    pub help: &'static str,
    pub aliases: &'static [&'static str],
    pub applies_to: AppliesTo,
}

/// Registry row. `None` in a table column means the table does not know the option.
struct Row {
    name: &'static str,
    kind: OptionKind,
    job: Option<OptionDefault>,
    function: Option<OptionDefault>,
    help: &'static str,
    aliases: &'static [&'static str],
    applies_to: AppliesTo,
}

impl Row {
    fn spec(&self, table: OptionTable) -> Option<OptionSpec> {
        let default = match table {
            OptionTable::Job => self.job?,
            OptionTable::Function => self.function?,
        };
        Some(OptionSpec {
            name: self.name,
            kind: self.kind,
            default,
            help: self.help,
            aliases: self.aliases,
            applies_to: self.applies_to,
        })
    }
}

const fn both(default: OptionDefault) -> (Option<OptionDefault>, Option<OptionDefault>) {
    (Some(default), Some(default))
}

macro_rules! row {
    ($name:literal, $kind:ident, $tables:expr, $applies:ident, $help:literal $(, [$($alias:literal),*])?) => {
        Row {
            name: $name,
            kind: OptionKind::$kind,
            job: $tables.0,
            function: $tables.1,
            help: $help,
            aliases: &[$($($alias),*)?],
            applies_to: AppliesTo::$applies,
        }
    };
}

static OPTIONS: &[Row] = &[
    row!("cores", Int, both(OptionDefault::Int(1)), All,
         "Number of cores to request", ["cpus", "cpus_per_task", "ppn"]),
    row!("modules", StrList, both(OptionDefault::None), Batch,
         "Environment modules to load before running", ["module"]),
    row!("suffix", Str, both(OptionDefault::Str("cluster")), All,
         "Suffix for generated script and output files"),
    row!("outfile", Path, both(OptionDefault::None), All,
         "File to write STDOUT to", ["stdout"]),
    row!("errfile", Path, both(OptionDefault::None), All,
         "File to write STDERR to", ["stderr"]),
    row!("threads", Int, (Some(OptionDefault::Int(4)), Some(OptionDefault::Int(24))), Local,
         "Number of local worker threads"),
    row!("nodes", Int, both(OptionDefault::Int(1)), Batch,
         "Number of nodes to request", ["node"]),
    row!("features", StrList, both(OptionDefault::None), Batch,
         "Node features or constraints to require", ["feature", "constraint"]),
    row!("time", Time, both(OptionDefault::Str("12:00:00")), Batch,
         "Walltime limit in [D-]HH:MM:SS", ["walltime"]),
    row!("mem", Memory, both(OptionDefault::Int(4000)), Batch,
         "Memory to request in MB, or with a unit like 4GB", ["memory"]),
    row!("partition", Str, both(OptionDefault::None), Batch,
         "Partition or queue to submit to", ["queue"]),
    row!("account", Str, both(OptionDefault::None), Batch,
         "Account to charge the job to"),
    row!("export", StrList, both(OptionDefault::None), Batch,
         "Environment variables to export to the job"),
    row!("begin", Str, both(OptionDefault::None), Batch,
         "Earliest start time for the job"),
    row!("depends", StrList, both(OptionDefault::None), All,
         "Queue ids this job must wait for", ["dependency", "dependencies", "depend"]),
    row!("dir", Path, both(OptionDefault::None), All,
         "Directory to run in, defaults to the current directory", ["runpath"]),
    row!("scriptpath", Path, both(OptionDefault::None), All,
         "Directory for generated scripts, defaults to outpath"),
    row!("outpath", Path, both(OptionDefault::None), All,
         "Directory for output files, defaults to dir"),
    row!("clean_files", Bool, both(OptionDefault::None), All,
         "Delete generated scripts after outputs are collected"),
    row!("clean_outputs", Bool, both(OptionDefault::None), All,
         "Delete output files after they are collected"),
    row!("imports", StrList, (None::<OptionDefault>, Some(OptionDefault::None)), Function,
         "Modules to import before calling the function", ["import"]),
];

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

/// Resolve a name or alias to its option in the given table.
pub fn spec(table: OptionTable, name: &str) -> Option<OptionSpec> {
    let name = normalize(name);
    OPTIONS
        .iter()
        .find(|row| row.name == name || row.aliases.contains(&name.as_str()))
        .and_then(|row| row.spec(table))
}

/// Closest known option name, if one is reasonably close.
fn suggest(table: OptionTable, name: &str) -> Option<String> {
    let name = normalize(name);
    table
        .specs()
        .flat_map(|s| std::iter::once(s.name).chain(s.aliases.iter().copied()))
        .map(|candidate| (edit_distance(&name, candidate), candidate))
        .filter(|(dist, candidate)| *dist <= 2.max(candidate.len() / 3))
        .min_by_key(|(dist, _)| *dist)
        .map(|(_, candidate)| candidate.to_string())
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}

fn unknown(table: OptionTable, name: &str) -> SchedError {
    SchedError::UnknownOption {
        name: name.to_string(),
        suggestion: suggest(table, name),
    }
}

/// Split a `key=value` assignment.
pub fn parse_assignment(raw: &str) -> SchedResult<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(SchedError::invalid_value(
            raw,
            "expected an assignment of the form key=value",
        )),
    }
}

/// Validate a whole mapping of keywords against a table.
pub fn check_arguments<I, K, V>(table: OptionTable, args: I) -> SchedResult<JobOptions>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<serde_json::Value>,
{
    let mut opts = JobOptions::new(table);
    for (key, value) in args {
        opts.set(key.as_ref(), value)?;
    }
    Ok(opts)
}

/// A validated set of options keyed by canonical name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    table: OptionTable,
    values: BTreeMap<String, OptionValue>,
}

impl JobOptions {
    /// Create an empty option set for a table.
    pub fn new(table: OptionTable) -> Self {
        Self {
            table,
            values: BTreeMap::new(),
        }
    }

    /// The table this set is validated against.
    pub fn table(&self) -> OptionTable {
        self.table
    }

    /// Set an option, resolving aliases and coercing the value.
    ///
    /// Setting the same option twice, under any spelling, is an error.
    pub fn set(&mut self, key: &str, value: impl Into<serde_json::Value>) -> SchedResult<()> {
        let spec = spec(self.table, key).ok_or_else(|| unknown(self.table, key))?;
        if self.values.contains_key(spec.name) {
            return Err(SchedError::DuplicateOption(spec.name.to_string()));
        }
        let value = OptionValue::coerce(&spec, value.into())?;
        self.values.insert(spec.name.to_string(), value);
        Ok(())
    }

    /// Set an option, replacing any earlier value.
    pub fn replace(&mut self, key: &str, value: impl Into<serde_json::Value>) -> SchedResult<()> {
        let spec = spec(self.table, key).ok_or_else(|| unknown(self.table, key))?;
        let value = OptionValue::coerce(&spec, value.into())?;
        self.values.insert(spec.name.to_string(), value);
        Ok(())
    }

    /// Remove an explicitly set option.
    pub fn remove(&mut self, key: &str) -> Option<OptionValue> {
        let spec = spec(self.table, key)?;
        self.values.remove(spec.name)
    }

    /// Whether the option was set explicitly.
    pub fn is_set(&self, key: &str) -> bool {
        spec(self.table, key).is_some_and(|s| self.values.contains_key(s.name))
    }

    /// Explicit value, falling back to the table default.
    pub fn get(&self, key: &str) -> Option<OptionValue> {
        let spec = spec(self.table, key)?;
        self.values
            .get(spec.name)
            .cloned()
            .or_else(|| OptionValue::from_default(&spec))
    }

    /// Explicitly set options, in canonical name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fill options missing here from a lower-priority set.
    ///
    /// Options the other set holds that this table does not know are skipped.
    pub fn fill_from(&mut self, other: &JobOptions) {
        for (key, value) in &other.values {
            if spec(self.table, key).is_none() {
                tracing::debug!("Skipping option {} not known to the {} table", key, self.table);
                continue;
            }
            self.values
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Options as a JSON mapping, suitable for storing in the config file.
    pub fn to_json(&self) -> BTreeMap<String, serde_json::Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    fn int(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            OptionValue::Int(n) => Some(n),
            _ => None,
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(OptionValue::List(items)) => items,
            _ => Vec::new(),
        }
    }

    /// Requested string option, if set.
    pub fn string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Requested path option, if set.
    pub fn path(&self, key: &str) -> Option<PathBuf> {
        match self.get(key)? {
            OptionValue::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Requested boolean option, if set.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            OptionValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn cores(&self) -> u64 {
        self.int("cores").unwrap_or(1)
    }

    pub fn nodes(&self) -> u64 {
        self.int("nodes").unwrap_or(1)
    }

    pub fn threads(&self) -> u64 {
        self.int("threads").unwrap_or(4)
    }

    /// Memory in MB.
    pub fn mem_mb(&self) -> Option<u64> {
        match self.get("mem")? {
            OptionValue::Memory(mb) => Some(mb),
            _ => None,
        }
    }

    pub fn walltime(&self) -> Option<Walltime> {
        match self.get("time")? {
            OptionValue::Time(t) => Some(t),
            _ => None,
        }
    }

    pub fn modules(&self) -> Vec<String> {
        self.list("modules")
    }

    pub fn features(&self) -> Vec<String> {
        self.list("features")
    }

    pub fn depends(&self) -> Vec<String> {
        self.list("depends")
    }

    /// Imports for function jobs. Always empty for the job table.
    pub fn imports(&self) -> Vec<String> {
        self.list("imports")
    }

    pub fn suffix(&self) -> String {
        self.string("suffix").unwrap_or_else(|| "cluster".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_defaults() {
        let job = OptionTable::Job;
        assert_eq!(spec(job, "cores").unwrap().default, OptionDefault::Int(1));
        assert_eq!(spec(job, "threads").unwrap().default, OptionDefault::Int(4));
        assert_eq!(spec(job, "mem").unwrap().default, OptionDefault::Int(4000));
        assert_eq!(
            spec(job, "time").unwrap().default,
            OptionDefault::Str("12:00:00")
        );
        assert_eq!(spec(job, "partition").unwrap().default, OptionDefault::None);

        let func = OptionTable::Function;
        assert_eq!(spec(func, "threads").unwrap().default, OptionDefault::Int(24));
        assert_eq!(spec(func, "imports").unwrap().kind, OptionKind::StrList);
        assert!(spec(job, "imports").is_none());
    }

    #[test]
    fn test_common_subset() {
        let common = [
            "cores", "modules", "suffix", "outfile", "errfile", "threads", "nodes", "features",
            "time", "mem", "partition", "account", "export", "begin",
        ];
        for name in common {
            let job = spec(OptionTable::Job, name).unwrap();
            let func = spec(OptionTable::Function, name).unwrap();
            assert_eq!(job.kind, func.kind, "{name}");
            if name != "threads" {
                assert_eq!(job.default, func.default, "{name}");
            }
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!(spec(OptionTable::Job, "cpus").unwrap().name, "cores");
        assert_eq!(spec(OptionTable::Job, "walltime").unwrap().name, "time");
        assert_eq!(spec(OptionTable::Job, "Queue").unwrap().name, "partition");
        assert_eq!(spec(OptionTable::Job, "cpus-per-task").unwrap().name, "cores");
        assert_eq!(spec(OptionTable::Function, "import").unwrap().name, "imports");
    }

    #[test]
    fn test_unknown_option_rejected() {
        let mut opts = JobOptions::new(OptionTable::Job);
        let err = opts.set("corse", 2).unwrap_err();
        match err {
            SchedError::UnknownOption { name, suggestion } => {
                assert_eq!(name, "corse");
                assert_eq!(suggestion.as_deref(), Some("cores"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = opts.set("imports", "numpy").unwrap_err();
        assert!(matches!(err, SchedError::UnknownOption { .. }));

        let err = opts.set("frobnicate_everything", 1).unwrap_err();
        assert!(matches!(
            err,
            SchedError::UnknownOption {
                suggestion: None,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_through_alias() {
        let mut opts = JobOptions::new(OptionTable::Job);
        opts.set("cores", 2).unwrap();
        let err = opts.set("cpus", 4).unwrap_err();
        assert!(matches!(err, SchedError::DuplicateOption(ref n) if n == "cores"));

        opts.replace("cpus", 4).unwrap();
        assert_eq!(opts.cores(), 4);
    }

    #[test]
    fn test_get_falls_back_to_default() {
        let opts = JobOptions::new(OptionTable::Job);
        assert_eq!(opts.cores(), 1);
        assert_eq!(opts.nodes(), 1);
        assert_eq!(opts.threads(), 4);
        assert_eq!(opts.mem_mb(), Some(4000));
        assert_eq!(opts.walltime().unwrap().to_string(), "12:00:00");
        assert_eq!(opts.suffix(), "cluster");
        assert!(opts.get("partition").is_none());
        assert!(opts.modules().is_empty());
        assert!(opts.is_empty());

        let opts = JobOptions::new(OptionTable::Function);
        assert_eq!(opts.threads(), 24);
    }

    #[test]
    fn test_fill_from_keeps_higher_priority() {
        let mut high = check_arguments(OptionTable::Function, [("cores", 8)]).unwrap();
        let low = check_arguments(
            OptionTable::Job,
            [("cores", serde_json::json!(2)), ("partition", serde_json::json!("bigmem"))],
        )
        .unwrap();

        high.fill_from(&low);
        assert_eq!(high.cores(), 8);
        assert_eq!(high.string("partition").as_deref(), Some("bigmem"));
        assert_eq!(high.table(), OptionTable::Function);
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("mem=8GB").unwrap(),
            ("mem".to_string(), "8GB".to_string())
        );
        assert_eq!(
            parse_assignment("export=A=1").unwrap(),
            ("export".to_string(), "A=1".to_string())
        );
        assert!(parse_assignment("cores").is_err());
        assert!(parse_assignment("=4").is_err());
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("cores", "cores"), 0);
        assert_eq!(edit_distance("corse", "cores"), 2);
        assert_eq!(edit_distance("mem", "memory"), 3);
    }
}
