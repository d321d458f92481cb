//! Configuration file and option profiles.
//!
//! The config lives at `$FYRD_CONFIG` or `~/.fyrd/config.yaml` and is created with
//! defaults on first use:
//!
//! ```yaml
//! queue:
//!   max_jobs: 1000
//!   sleep_len: 5
//!   queue_update: 20
//!   command_timeout: 60
//!   qtype: auto
//! jobs:
//!   clean_files: true
//!   clean_outputs: false
//!   file_block_time: 30
//!   suffix: cluster
//!   auto_submit: true
//!   interpreter: python3
//! local:
//!   threads: 4
//! opts: {}
//! profiles:
//!   default: {nodes: 1, cores: 1, mem: 4000, time: "02:00:00"}
//!   large: {nodes: 1, cores: 16, mem: 32000, time: "24:00:00"}
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{SchedError, SchedResult};
use crate::job::QueueType;
use crate::options::{self, JobOptions, OptionTable};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "FYRD_CONFIG";

/// Queue polling and submission limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    /// Maximum number of our jobs allowed in the queue before submission blocks.
    pub max_jobs: usize,

    /// Seconds between submission attempts.
    pub sleep_len: u64,

    /// Seconds between queue polls.
    pub queue_update: u64,

    /// Seconds a single sbatch, squeue, qsub or qstat call may take.
    pub command_timeout: u64,

    /// `auto`, `slurm`, `torque` or `local`.
    pub qtype: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_jobs: 1000,
            sleep_len: 5,
            queue_update: 20,
            command_timeout: 60,
            qtype: "auto".to_string(),
        }
    }
}

/// Job file handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobSettings {
    /// Delete generated scripts after outputs are collected.
    pub clean_files: bool,

    /// Delete output files after they are collected.
    pub clean_outputs: bool,

    /// Seconds to wait for output files to appear after a job finishes.
    pub file_block_time: u64,

    pub suffix: String,

    /// Submit unsubmitted jobs when they are waited on.
    pub auto_submit: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scriptpath: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outpath: Option<PathBuf>,

    /// Interpreter for function jobs.
    pub interpreter: String,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            clean_files: true,
            clean_outputs: false,
            file_block_time: 30,
            suffix: "cluster".to_string(),
            auto_submit: true,
            scriptpath: None,
            outpath: None,
            interpreter: "python3".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalSettings {
    /// Pool size when a job gives no `threads` option.
    pub threads: usize,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self { threads: 4 }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub queue: QueueSettings,
    pub jobs: JobSettings,
    pub local: LocalSettings,

    /// Options applied to every job.
    pub opts: BTreeMap<String, Value>,

    /// Named option sets.
    pub profiles: BTreeMap<String, BTreeMap<String, Value>>,

    #[serde(skip)]
    path: Option<PathBuf>,
}

fn default_profiles() -> BTreeMap<String, BTreeMap<String, Value>> {
    let profile = |cores: u64, mem: u64, time: &str| -> BTreeMap<String, Value> {
        [
            ("nodes".to_string(), json!(1)),
            ("cores".to_string(), json!(cores)),
            ("mem".to_string(), json!(mem)),
            ("time".to_string(), json!(time)),
        ]
        .into_iter()
        .collect()
    };
    [
        ("default".to_string(), profile(1, 4000, "02:00:00")),
        ("large".to_string(), profile(16, 32000, "24:00:00")),
    ]
    .into_iter()
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            jobs: JobSettings::default(),
            local: LocalSettings::default(),
            opts: BTreeMap::new(),
            profiles: default_profiles(),
            path: None,
        }
    }
}

fn config_err(message: impl std::fmt::Display) -> SchedError {
    SchedError::ConfigError(message.to_string())
}

impl Config {
    /// Config file location: `$FYRD_CONFIG` or `~/.fyrd/config.yaml`.
    pub fn default_path() -> SchedResult<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        dirs::home_dir()
            .map(|home| home.join(".fyrd").join("config.yaml"))
            .ok_or_else(|| config_err("could not determine home directory"))
    }

    /// Load the config from the default location.
    pub fn load_default() -> SchedResult<Self> {
        Self::load(Self::default_path()?)
    }

    /// Load a config file, creating it with defaults when absent.
    pub fn load(path: impl AsRef<Path>) -> SchedResult<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                Config::default()
            } else {
                serde_yaml_ng::from_str::<Config>(&content)
                    .map_err(|e| config_err(format!("{}: {e}", path.display())))?
            }
        } else {
            tracing::info!("Creating config file {}", path.display());
            let config = Config::default();
            config.save_to(path)?;
            config
        };
        config.path = Some(path.to_path_buf());

        if !config.profiles.contains_key("default") {
            tracing::warn!("No default profile in {}, recreating it", path.display());
            config.restore_default_profile();
            config.save()?;
        }

        Ok(config)
    }

    /// File this config was loaded from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the config back to the file it was loaded from.
    ///
    /// A config that was never loaded from disk is not saved.
    pub fn save(&self) -> SchedResult<()> {
        match &self.path {
            Some(path) => self.save_to(path),
            None => {
                tracing::debug!("Config has no file, not saving");
                Ok(())
            }
        }
    }

    fn save_to(&self, path: &Path) -> SchedResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml_ng::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Backend to use, detecting it when set to `auto`.
    pub fn qtype(&self) -> SchedResult<QueueType> {
        self.queue.qtype.parse()
    }

    /// Look up `section` or `section.key`.
    pub fn get(&self, key: &str) -> SchedResult<Option<Value>> {
        let tree = serde_json::to_value(self)?;
        let mut node = &tree;
        for part in key.split('.') {
            match node.get(part) {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }
        Ok(Some(node.clone()))
    }

    /// Set `section.key` from a YAML scalar such as `20`, `true` or `long`.
    ///
    /// Values under `opts` and `profiles` are validated as job options.
    pub fn set(&mut self, key: &str, raw: &str) -> SchedResult<()> {
        let value: Value = serde_yaml_ng::from_str(raw)?;
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["opts", option] => {
                let (name, value) = validated_option(option, value)?;
                self.opts.insert(name, value);
            }
            ["profiles", profile, option] => {
                let (name, value) = validated_option(option, value)?;
                self.profiles
                    .entry(profile.to_string())
                    .or_default()
                    .insert(name, value);
            }
            [section, field] => {
                let mut tree = serde_json::to_value(&*self)?;
                let target = tree
                    .get_mut(*section)
                    .and_then(Value::as_object_mut)
                    .ok_or_else(|| config_err(format!("unknown section '{section}'")))?;
                target.insert(field.to_string(), value);
                let mut updated: Config = serde_json::from_value(tree)
                    .map_err(|e| config_err(format!("invalid value for {key}: {e}")))?;
                if *section == "queue" && *field == "qtype" {
                    updated.qtype()?;
                }
                updated.path = self.path.take();
                *self = updated;
            }
            _ => return Err(config_err(format!("expected section.key, got '{key}'"))),
        }
        Ok(())
    }

    /// Remove `section.key`, restoring its default. Returns whether anything changed.
    pub fn delete(&mut self, key: &str) -> SchedResult<bool> {
        let parts: Vec<&str> = key.split('.').collect();
        let changed = match parts.as_slice() {
            ["opts", option] => self.opts.remove(&canonical(option)).is_some(),
            ["profiles", profile] => self.delete_profile(profile)?,
            ["profiles", profile, option] => self
                .profiles
                .get_mut(*profile)
                .is_some_and(|p| p.remove(&canonical(option)).is_some()),
            [section, field] => {
                let mut tree = serde_json::to_value(&*self)?;
                let removed = tree
                    .get_mut(*section)
                    .and_then(Value::as_object_mut)
                    .and_then(|obj| obj.remove(*field))
                    .is_some();
                let mut updated: Config = serde_json::from_value(tree)?;
                updated.path = self.path.clone();
                let changed = removed && updated != *self;
                *self = updated;
                changed
            }
            _ => return Err(config_err(format!("expected section.key, got '{key}'"))),
        };
        Ok(changed)
    }

    /// Restore every default, keeping the file location.
    pub fn reset(&mut self) {
        let path = self.path.take();
        *self = Config::default();
        self.path = path;
    }

    /// A profile as validated options.
    pub fn profile(&self, name: &str) -> SchedResult<JobOptions> {
        match self.profiles.get(name) {
            Some(values) => options::check_arguments(OptionTable::Function, values.clone())
                .map_err(|e| config_err(format!("profile '{name}': {e}"))),
            None if name == "default" => {
                tracing::warn!("Default profile missing, using built-in defaults");
                let values = default_profiles().remove("default").unwrap_or_default();
                options::check_arguments(OptionTable::Function, values)
            }
            None => Err(SchedError::ProfileNotFound(name.to_string())),
        }
    }

    /// Store a profile, replacing any existing one of the same name.
    pub fn set_profile(&mut self, name: &str, options: &JobOptions) -> SchedResult<()> {
        if name.is_empty() || name.contains('.') {
            return Err(config_err(format!("invalid profile name '{name}'")));
        }
        // Re-validate in case the options were built for a narrower table.
        let values = options.to_json();
        options::check_arguments(OptionTable::Function, values.clone())?;
        self.profiles.insert(name.to_string(), values);
        Ok(())
    }

    /// Delete a profile. The default profile cannot be deleted.
    pub fn delete_profile(&mut self, name: &str) -> SchedResult<bool> {
        if name == "default" {
            return Err(config_err("the default profile cannot be deleted"));
        }
        Ok(self.profiles.remove(name).is_some())
    }

    /// Names of all profiles.
    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    fn restore_default_profile(&mut self) {
        if let Some(default) = default_profiles().remove("default") {
            self.profiles.insert("default".to_string(), default);
        }
    }

    /// Options applied to every job.
    pub fn opts(&self) -> SchedResult<JobOptions> {
        options::check_arguments(OptionTable::Function, self.opts.clone())
            .map_err(|e| config_err(format!("opts: {e}")))
    }
}

fn canonical(option: &str) -> String {
    options::spec(OptionTable::Function, option)
        .map(|s| s.name.to_string())
        .unwrap_or_else(|| option.to_string())
}

fn validated_option(option: &str, value: Value) -> SchedResult<(String, Value)> {
    let mut opts = JobOptions::new(OptionTable::Function);
    opts.set(option, value)?;
    opts.to_json()
        .into_iter()
        .next()
        .ok_or_else(|| SchedError::Internal(format!("option {option} was not stored")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue.max_jobs, 1000);
        assert_eq!(config.queue.sleep_len, 5);
        assert_eq!(config.queue.queue_update, 20);
        assert_eq!(config.queue.command_timeout, 60);
        assert_eq!(config.jobs.file_block_time, 30);
        assert!(config.jobs.clean_files);
        assert!(!config.jobs.clean_outputs);
        assert_eq!(config.local.threads, 4);

        let large = config.profile("large").unwrap();
        assert_eq!(large.cores(), 16);
        assert_eq!(large.mem_mb(), Some(32000));
    }

    #[test]
    fn test_load_creates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.yaml");

        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.path(), Some(path.as_path()));

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "queue:\n  qtype: local\nprofiles:\n  fast: {cores: 2}\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.qtype().unwrap(), QueueType::Local);
        assert_eq!(config.queue.max_jobs, 1000);
        // default profile is recreated and written back
        assert!(config.profiles.contains_key("default"));
        assert!(std::fs::read_to_string(&path).unwrap().contains("default"));
        assert_eq!(config.profile("fast").unwrap().cores(), 2);
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "queue:\n  max_jobz: 5\n").unwrap();
        assert!(matches!(Config::load(&path), Err(SchedError::ConfigError(_))));
    }

    #[test]
    fn test_get_set_delete() {
        let mut config = Config::default();
        config.set("queue.queue_update", "60").unwrap();
        assert_eq!(config.queue.queue_update, 60);
        assert_eq!(config.get("queue.queue_update").unwrap(), Some(json!(60)));

        config.set("jobs.clean_files", "false").unwrap();
        assert!(!config.jobs.clean_files);

        assert!(config.set("queue.queue_update", "soon").is_err());
        assert!(config.set("queue.bogus", "1").is_err());
        assert!(config.set("nosection.key", "1").is_err());
        assert!(config.set("queue.qtype", "condor").is_err());
        assert!(config.set("toplevel", "1").is_err());

        assert!(config.delete("queue.queue_update").unwrap());
        assert_eq!(config.queue.queue_update, 20);
        assert_eq!(config.queue.command_timeout, 60);
        assert!(!config.delete("queue.queue_update").unwrap());
        assert_eq!(config.get("queue.missing").unwrap(), None);
    }

    #[test]
    fn test_set_opts_validated() {
        let mut config = Config::default();
        config.set("opts.queue", "long").unwrap();
        assert_eq!(config.opts.get("partition"), Some(&json!("long")));
        assert!(config.set("opts.corez", "2").is_err());

        config.set("profiles.big.mem", "64GB").unwrap();
        assert_eq!(config.profile("big").unwrap().mem_mb(), Some(65_536));

        assert!(config.delete("opts.partition").unwrap());
        assert!(config.opts.is_empty());
    }

    #[test]
    fn test_profiles() {
        let mut config = Config::default();
        let opts = options::check_arguments(OptionTable::Job, [("cores", 4), ("nodes", 2)]).unwrap();
        config.set_profile("wide", &opts).unwrap();
        assert_eq!(config.profile("wide").unwrap().nodes(), 2);
        assert!(config.profile_names().contains(&"wide".to_string()));

        assert!(config.delete_profile("wide").unwrap());
        assert!(!config.delete_profile("wide").unwrap());
        assert!(config.delete_profile("default").is_err());
        assert!(matches!(
            config.profile("wide"),
            Err(SchedError::ProfileNotFound(_))
        ));

        config.profiles.remove("default");
        assert_eq!(config.profile("default").unwrap().cores(), 1);
    }

    #[test]
    fn test_reset_keeps_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        let mut config = Config::load(&path).unwrap();
        config.set("local.threads", "16").unwrap();
        config.reset();
        assert_eq!(config.local.threads, 4);
        assert_eq!(config.path(), Some(path.as_path()));
    }
}
