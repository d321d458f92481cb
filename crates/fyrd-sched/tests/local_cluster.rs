//! Local Backend Integration Tests
//!
//! Runs real bash jobs through the local pool: dependencies between jobs, output
//! collection and cleanup, and persisting jobs between processes.

use std::path::Path;
use std::time::Duration;

use fyrd_sched::{
    Cluster, Config, Job, JobFilter, JobState, JsonStore, QueueType, SchedError, StateStore,
};
use serde_json::json;
use tokio::time::Instant;

fn config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.queue.qtype = "local".to_string();
    config.queue.queue_update = 1;
    config.queue.sleep_len = 0;
    config.jobs.file_block_time = 1;
    config.jobs.outpath = Some(dir.join("out"));
    config.jobs.scriptpath = Some(dir.join("scripts"));
    config
}

#[tokio::test]
async fn test_dependency_chain() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let cluster = Cluster::new(config.clone()).unwrap();
    let data = tmp.path().join("data.txt");

    let mut first = Job::script(format!("sleep 0.2; echo 21 > {}", data.display()))
        .name("produce")
        .build(&config)
        .unwrap();
    assert_eq!(first.qtype, QueueType::Local);
    cluster.submit(&mut first).await.unwrap();

    let mut second = Job::script(format!("echo $(( $(cat {}) * 2 ))", data.display()))
        .name("consume")
        .option("depends", first.queue_id.clone().unwrap())
        .build(&config)
        .unwrap();

    let output = cluster
        .get(&mut second, Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(output.state, JobState::Completed);
    assert_eq!(output.stdout.trim(), "42");

    assert_eq!(
        cluster.wait(&mut first, None).await.unwrap(),
        JobState::Completed
    );
}

#[tokio::test]
async fn test_failed_dependency_skips_job() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let cluster = Cluster::new(config.clone()).unwrap();

    let mut first = Job::script("exit 1").build(&config).unwrap();
    cluster.submit(&mut first).await.unwrap();

    let mut second = Job::script("echo should not run")
        .option("depends", first.queue_id.clone().unwrap())
        .build(&config)
        .unwrap();
    let state = cluster.wait(&mut second, None).await.unwrap();
    assert_eq!(state, JobState::Failed);
    assert!(!second.outfile.exists());
}

#[tokio::test]
async fn test_outputs_and_cleanup() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let cluster = Cluster::new(config.clone()).unwrap();

    let mut job = Job::script("echo out; echo err >&2")
        .option("clean_outputs", true)
        .option("dir", tmp.path().to_string_lossy().to_string())
        .build(&config)
        .unwrap();
    assert!(job.outfile.starts_with(tmp.path().join("out")));
    assert!(job.scripts.submission.path.starts_with(tmp.path().join("scripts")));

    let output = cluster.get(&mut job, None).await.unwrap();
    assert_eq!(output.stdout, "out\n");
    assert_eq!(output.stderr, "err\n");

    assert!(!job.scripts.submission.path.exists());
    assert!(!job.outfile.exists());
    assert!(!job.errfile.exists());
}

#[tokio::test]
async fn test_store_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let cluster = Cluster::new(config.clone()).unwrap();

    let mut job = Job::script("echo stored").name("stored").build(&config).unwrap();
    cluster.wait(&mut job, None).await.unwrap();

    {
        let store = JsonStore::new(tmp.path().join("state")).await.unwrap();
        store.save_job(&job).await.unwrap();
    }

    let store = JsonStore::new(tmp.path().join("state")).await.unwrap();
    let found = store.find(&job.name).await.unwrap().unwrap();
    assert_eq!(found.state, JobState::Completed);
    assert_eq!(cluster.stdout(&found).await.unwrap(), "stored\n");

    let done = store
        .list_jobs(&JobFilter::default().with_states([JobState::Completed]))
        .await
        .unwrap();
    assert_eq!(done.len(), 1);
}

#[tokio::test]
async fn test_resubmit() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let cluster = Cluster::new(config.clone()).unwrap();

    let mut job = Job::script("echo again").build(&config).unwrap();
    cluster.wait(&mut job, None).await.unwrap();
    let first_id = job.queue_id.clone();

    cluster.resubmit(&mut job).await.unwrap();
    assert_ne!(job.queue_id, first_id);
    assert_eq!(
        cluster.wait(&mut job, None).await.unwrap(),
        JobState::Completed
    );
    assert_eq!(cluster.queue_len(QueueType::Local).await.unwrap(), 0);
}

#[tokio::test]
async fn test_job_threads_size_the_pool() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let cluster = Cluster::new(config.clone()).unwrap();
    assert!(cluster.local().is_none());

    let start = Instant::now();
    let mut jobs = Vec::new();
    for name in ["first", "second"] {
        let mut job = Job::script("sleep 0.5")
            .name(name)
            .option("threads", 1)
            .build(&config)
            .unwrap();
        cluster.submit(&mut job).await.unwrap();
        jobs.push(job);
    }
    assert_eq!(cluster.local().unwrap().threads(), 1);

    for job in &mut jobs {
        assert_eq!(cluster.wait(job, None).await.unwrap(), JobState::Completed);
    }
    // one thread runs the jobs back to back
    assert!(start.elapsed() >= Duration::from_millis(1000));
}

#[tokio::test]
async fn test_pool_size_fallbacks() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.local.threads = 2;

    let cluster = Cluster::new(config.clone()).unwrap();
    let mut job = Job::script("true").build(&config).unwrap();
    cluster.submit(&mut job).await.unwrap();
    assert_eq!(cluster.local().unwrap().threads(), 2);

    // the first local job decides, later ones share the pool
    let mut wide = Job::script("true").option("threads", 8).build(&config).unwrap();
    cluster.submit(&mut wide).await.unwrap();
    assert_eq!(cluster.local().unwrap().threads(), 2);

    config.opts.insert("threads".to_string(), json!(3));
    let cluster = Cluster::new(config.clone()).unwrap();
    let mut job = Job::script("true").build(&config).unwrap();
    cluster.submit(&mut job).await.unwrap();
    assert_eq!(cluster.local().unwrap().threads(), 3);
}

#[tokio::test]
async fn test_local_job_of_another_process() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let owner = Cluster::new(config.clone()).unwrap();
    let other = Cluster::new(config.clone()).unwrap();

    let mut job = Job::script("sleep 5").name("elsewhere").build(&config).unwrap();
    owner.submit(&mut job).await.unwrap();
    assert_eq!(job.queue_id.as_deref(), Some("1"));

    // the same record as read back by a second process
    let mut seen = job.clone();
    assert_eq!(other.update(&mut seen).await.unwrap(), JobState::Submitted);
    assert_eq!(seen.state, JobState::Submitted);
    assert!(matches!(
        other.cancel(&mut seen).await,
        Err(SchedError::LocalJobNotOwned(_))
    ));
    assert!(matches!(
        other.wait(&mut seen, Some(Duration::from_secs(1))).await,
        Err(SchedError::LocalJobNotOwned(_))
    ));

    // a job of its own with the same local id does not change that
    let mut mine = Job::script("true").name("mine").build(&config).unwrap();
    other.submit(&mut mine).await.unwrap();
    assert_eq!(mine.queue_id, job.queue_id);
    assert_eq!(other.wait(&mut mine, None).await.unwrap(), JobState::Completed);
    assert_eq!(other.update(&mut seen).await.unwrap(), JobState::Submitted);

    owner.cancel(&mut job).await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);
}
