//! CLI end-to-end tests.
//!
//! Runs the `fyrd` binary against a scratch config and job store. Jobs use the
//! local backend so no batch system is needed.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

struct Scratch {
    dir: tempfile::TempDir,
}

impl Scratch {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config_path(&self) -> PathBuf {
        self.path().join("config.yaml")
    }

    fn state_dir(&self) -> PathBuf {
        self.path().join("jobs")
    }

    /// Run fyrd with the scratch config and store passed through the environment,
    /// so arguments after `--` stay untouched.
    fn fyrd(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_fyrd"))
            .args(args)
            .env("FYRD_CONFIG", self.config_path())
            .env("FYRD_STATE_DIR", self.state_dir())
            .env("HOME", self.path())
            .current_dir(self.path())
            .output()
            .unwrap()
    }

    fn ok(&self, args: &[&str]) -> String {
        let output = self.fyrd(args);
        assert!(
            output.status.success(),
            "fyrd {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }
}

#[test]
fn test_options_tables() {
    let scratch = Scratch::new();
    let job = scratch.ok(&["options"]);
    assert!(job.contains("cores"));
    assert!(job.contains("12:00:00"));
    assert!(!job.contains("imports"));

    let function = scratch.ok(&["options", "--function"]);
    assert!(function.contains("imports"));
    assert!(function.contains("24"));
}

#[test]
fn test_conf_round_trip() {
    let scratch = Scratch::new();
    scratch.ok(&["conf", "set", "queue.max_jobs", "50"]);
    assert_eq!(scratch.ok(&["conf", "get", "queue.max_jobs"]).trim(), "50");

    let output = scratch.fyrd(&["conf", "set", "queue.qtype", "lsf"]);
    assert!(!output.status.success());

    scratch.ok(&["conf", "reset"]);
    assert_eq!(scratch.ok(&["conf", "get", "queue.max_jobs"]).trim(), "1000");
}

#[test]
fn test_profiles() {
    let scratch = Scratch::new();
    scratch.ok(&["profile", "set", "big", "cores=16", "mem=64GB"]);

    let shown = scratch.ok(&["profile", "show", "big"]);
    assert!(shown.contains("cores"));
    assert!(shown.contains("65536MB"));

    let listed = scratch.ok(&["profile", "list"]);
    assert!(listed.contains("default"));
    assert!(listed.contains("big"));

    scratch.ok(&["profile", "delete", "big"]);
    assert!(!scratch.ok(&["profile", "list"]).contains("big"));
    assert!(!scratch.fyrd(&["profile", "delete", "default"]).status.success());
}

#[test]
fn test_dry_run_slurm() {
    let scratch = Scratch::new();
    let scripts = scratch.ok(&[
        "submit", "--dry-run", "-q", "slurm", "-o", "cores=4", "-o", "partition=short", "--",
        "echo", "hi",
    ]);
    assert!(scripts.contains("#SBATCH --cpus-per-task 4"));
    assert!(scripts.contains("#SBATCH -p short"));
    assert!(scripts.contains("srun bash"));
    assert!(scripts.contains("\necho hi\n"), "{scripts}");
    assert!(!scripts.contains("--config"));
    assert!(!scratch.path().join("jobs").join("jobs").read_dir().unwrap().any(|_| true));
}

#[test]
fn test_unknown_option_suggestion() {
    let scratch = Scratch::new();
    let output = scratch.fyrd(&["submit", "--dry-run", "-o", "coers=2", "--", "true"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("did you mean 'cores'"), "{stderr}");
}

#[test]
fn test_local_submit_status_output() {
    let scratch = Scratch::new();
    scratch.ok(&["conf", "set", "queue.qtype", "local"]);
    scratch.ok(&["conf", "set", "jobs.file_block_time", "1"]);
    scratch.ok(&["conf", "set", "jobs.clean_files", "false"]);

    let submitted = scratch.ok(&["submit", "--name", "greet", "--", "echo hello cli"]);
    assert!(submitted.contains("Submitted"));
    assert!(submitted.contains("hello cli"));
    assert!(submitted.contains("completed"));

    let status = scratch.ok(&["status", "--all"]);
    assert!(status.contains("greet."));
    assert!(status.contains("completed"));

    let name = status
        .split_whitespace()
        .find(|word| word.starts_with("greet."))
        .unwrap()
        .to_string();
    assert_eq!(scratch.ok(&["output", &name]), "hello cli\n");

    let cleaned = scratch.ok(&["clean", &name]);
    assert!(cleaned.contains("Removed 1 file(s)"));
}

#[test]
fn test_local_failure_exit_code() {
    let scratch = Scratch::new();
    scratch.ok(&["conf", "set", "queue.qtype", "local"]);
    scratch.ok(&["conf", "set", "jobs.file_block_time", "1"]);

    let output = scratch.fyrd(&["submit", "--", "exit 3"]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("exit code 3"), "{stdout}");
}

#[test]
fn test_missing_job() {
    let scratch = Scratch::new();
    let output = scratch.fyrd(&["status", "nosuchjob"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No job matching"));
}

#[test]
fn test_global_flags_before_subcommand() {
    let scratch = Scratch::new();
    let other = scratch.path().join("other.yaml");
    let output = Command::new(env!("CARGO_BIN_EXE_fyrd"))
        .arg("--config")
        .arg(&other)
        .arg("--state-dir")
        .arg(scratch.state_dir())
        .args(["submit", "--dry-run", "-q", "local", "--", "echo", "two words"])
        .env("HOME", scratch.path())
        .env_remove("FYRD_CONFIG")
        .env_remove("FYRD_STATE_DIR")
        .current_dir(scratch.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let scripts = String::from_utf8_lossy(&output.stdout);
    assert!(scripts.contains("echo 'two words'"), "{scripts}");
    assert!(!scripts.contains("--config"));
    assert!(!scripts.contains("--state-dir"));
    assert!(other.exists());
    assert!(!scratch.config_path().exists());
}

#[test]
fn test_call_imports_stay_whole() {
    let scratch = Scratch::new();
    let scripts = scratch.ok(&[
        "call",
        "os.path.join",
        "\"a\"",
        "\"b\"",
        "--import",
        "from os import path, sep",
        "-o",
        "imports=json",
        "--dry-run",
        "-q",
        "local",
    ]);
    assert!(scripts.contains("    import json\n"), "{scripts}");
    assert!(scripts.contains("    from os import path, sep\n"), "{scripts}");
    assert!(!scripts.contains("import sep"));
}
