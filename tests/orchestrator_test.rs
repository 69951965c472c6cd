//! End-to-end orchestrator tests against fake downloader scripts.
//!
//! Each test writes its own downloader stand-in into a temp directory, so
//! nothing here shells out to a real yt-dlp.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use uuid::Uuid;

use common::{test_config, wait_for_state, wait_for_terminal, write_fake_downloader};
use mediafetch::job::{DownloadOptions, FailureCode, JobState};
use mediafetch::orchestrator::{CancelOutcome, Orchestrator, ServiceStatus, SubmitOutcome};
use mediafetch::sink::{ChannelSink, NullSink};

struct Harness {
    orchestrator: Arc<Orchestrator>,
    _temp: TempDir,
}

async fn start_with_script(script_body: &str) -> Harness {
    start_with_script_and(script_body, |_| {}).await
}

async fn start_with_script_and(
    script_body: &str,
    tweak: impl FnOnce(&mut mediafetch::config::Config),
) -> Harness {
    let temp = TempDir::new().unwrap();
    let binary = write_fake_downloader(temp.path(), "fake-dl", script_body);
    let mut config = test_config(&binary, &temp.path().join("artifacts"));
    tweak(&mut config);
    let orchestrator = Orchestrator::start(&config, Arc::new(NullSink)).await.unwrap();
    Harness {
        orchestrator,
        _temp: temp,
    }
}

fn submit(harness: &Harness, url: &str) -> mediafetch::job::JobSnapshot {
    match harness
        .orchestrator
        .submit(url, DownloadOptions::default(), "tester")
        .unwrap()
    {
        SubmitOutcome::Enqueued(snapshot) => snapshot,
        SubmitOutcome::AttachedExisting(_) => panic!("expected a fresh job"),
    }
}

#[tokio::test]
async fn successful_download_records_artifact() {
    let harness = start_with_script(
        r#"echo "downloading $last"
touch "$out/media.mp4"
exit 0"#,
    )
    .await;

    let job = submit(&harness, "https://example.com/watch?v=ok");
    assert_eq!(job.state, JobState::Queued);

    let done = wait_for_terminal(&harness.orchestrator, job.id).await;
    assert_eq!(done.state, JobState::Succeeded);
    let artifact = done.artifact.expect("artifact path");
    assert!(artifact.ends_with("media.mp4"));
    assert!(artifact.exists());
    assert!(done.error.is_none());
    assert!(done.started_at.is_some());
    assert!(done.finished_at.is_some());
}

#[tokio::test]
async fn failed_download_surfaces_stderr_tail() {
    let harness = start_with_script(
        r#"echo "ERROR: Unsupported URL: $last" >&2
exit 1"#,
    )
    .await;

    let job = submit(&harness, "https://example.com/not-a-video");
    let done = wait_for_terminal(&harness.orchestrator, job.id).await;

    assert_eq!(done.state, JobState::Failed);
    assert!(done.artifact.is_none());
    let error = done.error.expect("error detail");
    assert_eq!(error.code, FailureCode::Runtime);
    assert!(error.message.contains("Unsupported URL"));
    // no partial output left behind
    assert!(!harness._temp.path().join("artifacts").join(job.id.to_string()).exists());
}

#[tokio::test]
async fn clean_exit_without_output_is_a_failure() {
    let harness = start_with_script("exit 0").await;

    let job = submit(&harness, "https://example.com/silent");
    let done = wait_for_terminal(&harness.orchestrator, job.id).await;

    assert_eq!(done.state, JobState::Failed);
    let error = done.error.expect("error detail");
    assert!(error.message.contains("no output"));
}

#[tokio::test]
async fn missing_binary_degrades_health_and_fails_jobs() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(
        &temp.path().join("no-such-downloader"),
        &temp.path().join("artifacts"),
    );
    config.scheduler.max_concurrency = 1;
    let orchestrator = Orchestrator::start(&config, Arc::new(NullSink)).await.unwrap();

    let health = orchestrator.health().await;
    assert_eq!(health.status, ServiceStatus::Degraded);
    assert!(health.downloader_version.is_none());
    assert!(health.downloader_error.is_some());

    let job = match orchestrator
        .submit("https://example.com/v", DownloadOptions::default(), "tester")
        .unwrap()
    {
        SubmitOutcome::Enqueued(snapshot) => snapshot,
        SubmitOutcome::AttachedExisting(_) => panic!("expected a fresh job"),
    };
    let done = wait_for_terminal(&orchestrator, job.id).await;
    assert_eq!(done.state, JobState::Failed);
    assert_eq!(done.error.expect("error detail").code, FailureCode::Spawn);
}

#[tokio::test]
async fn invalid_urls_never_create_jobs() {
    let harness = start_with_script("exit 0").await;

    for bad in ["not a url", "ftp://example.com/file", "data:text/plain,hi"] {
        assert!(
            harness
                .orchestrator
                .submit(bad, DownloadOptions::default(), "tester")
                .is_err(),
            "expected rejection for {bad}"
        );
    }
    assert!(harness.orchestrator.list(None, None, 10).is_empty());
}

#[tokio::test]
async fn duplicate_submissions_share_one_subprocess() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("invocations.log");
    let binary = write_fake_downloader(
        temp.path(),
        "fake-dl",
        &format!(
            r#"echo "$last" >> {}
sleep 1
touch "$out/clip.mp4"
exit 0"#,
            marker.display()
        ),
    );
    let config = test_config(&binary, &temp.path().join("artifacts"));
    let (sink, mut events) = ChannelSink::new();
    let orchestrator = Orchestrator::start(&config, Arc::new(sink)).await.unwrap();

    let url = "https://example.com/watch?v=shared";
    let first = orchestrator
        .submit(url, DownloadOptions::default(), "alice")
        .unwrap();
    let second = orchestrator
        .submit(url, DownloadOptions::default(), "bob")
        .unwrap();

    let SubmitOutcome::Enqueued(first) = first else {
        panic!("first submission must create the job");
    };
    let SubmitOutcome::AttachedExisting(attached) = second else {
        panic!("second submission must attach");
    };
    assert_eq!(attached.id, first.id);
    assert_eq!(attached.followers, vec!["alice", "bob"]);

    let done = wait_for_terminal(&orchestrator, first.id).await;
    assert_eq!(done.state, JobState::Succeeded);

    // both callers are notified of the shared outcome
    let mut notified = Vec::new();
    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("notification within deadline")
            .expect("sink open");
        assert_eq!(event.job_id, first.id);
        assert_eq!(event.state, JobState::Succeeded);
        notified.push(event.requester);
    }
    assert_eq!(notified, vec!["alice", "bob"]);

    // exactly one subprocess ran
    let invocations = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(invocations.lines().count(), 1);
}

#[tokio::test]
async fn resubmitting_after_terminal_creates_a_new_job() {
    let harness = start_with_script(
        r#"touch "$out/clip.mp4"
exit 0"#,
    )
    .await;

    let url = "https://example.com/watch?v=again";
    let first = submit(&harness, url);
    wait_for_terminal(&harness.orchestrator, first.id).await;

    let second = submit(&harness, url);
    assert_ne!(second.id, first.id);
    wait_for_terminal(&harness.orchestrator, second.id).await;
}

#[tokio::test]
async fn concurrency_bound_holds_and_admission_is_fifo() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("admissions.log");
    let binary = write_fake_downloader(
        temp.path(),
        "fake-dl",
        &format!(
            r#"echo "$last" >> {}
sleep 0.3
touch "$out/clip.mp4"
exit 0"#,
            marker.display()
        ),
    );
    let mut config = test_config(&binary, &temp.path().join("artifacts"));
    config.scheduler.max_concurrency = 1;
    let orchestrator = Orchestrator::start(&config, Arc::new(NullSink)).await.unwrap();

    let urls = [
        "https://example.com/watch?v=one",
        "https://example.com/watch?v=two",
        "https://example.com/watch?v=three",
    ];
    let ids: Vec<_> = urls
        .iter()
        .map(|url| {
            match orchestrator
                .submit(url, DownloadOptions::default(), "tester")
                .unwrap()
            {
                SubmitOutcome::Enqueued(snapshot) => snapshot.id,
                SubmitOutcome::AttachedExisting(_) => panic!("distinct urls must not dedup"),
            }
        })
        .collect();

    // never more than one running while the backlog drains
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let jobs = orchestrator.list(None, None, 10);
        let running = jobs
            .iter()
            .filter(|job| job.state == JobState::Running)
            .count();
        assert!(running <= 1, "concurrency bound violated: {running} running");

        if jobs.iter().all(|job| job.state.is_terminal()) {
            break;
        }
        assert!(Instant::now() < deadline, "jobs did not finish in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for id in &ids {
        assert_eq!(
            orchestrator.status(*id).unwrap().state,
            JobState::Succeeded
        );
    }

    // admission order is submission order
    let admissions = std::fs::read_to_string(&marker).unwrap();
    let order: Vec<&str> = admissions.lines().collect();
    assert_eq!(order, urls);
}

#[tokio::test]
async fn cancelling_a_queued_job_never_spawns() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("spawned.log");
    let binary = write_fake_downloader(
        temp.path(),
        "fake-dl",
        &format!(
            r#"echo "$last" >> {}
exec sleep 5"#,
            marker.display()
        ),
    );
    let mut config = test_config(&binary, &temp.path().join("artifacts"));
    config.scheduler.max_concurrency = 1;
    let orchestrator = Orchestrator::start(&config, Arc::new(NullSink)).await.unwrap();

    let blocker = match orchestrator
        .submit(
            "https://example.com/watch?v=blocker",
            DownloadOptions::default(),
            "tester",
        )
        .unwrap()
    {
        SubmitOutcome::Enqueued(snapshot) => snapshot,
        SubmitOutcome::AttachedExisting(_) => panic!("expected a fresh job"),
    };
    wait_for_state(&orchestrator, blocker.id, JobState::Running).await;

    let queued = match orchestrator
        .submit(
            "https://example.com/watch?v=queued",
            DownloadOptions::default(),
            "tester",
        )
        .unwrap()
    {
        SubmitOutcome::Enqueued(snapshot) => snapshot,
        SubmitOutcome::AttachedExisting(_) => panic!("expected a fresh job"),
    };
    assert_eq!(queued.state, JobState::Queued);

    let outcome = orchestrator.cancel(queued.id).await.unwrap();
    let CancelOutcome::Cancelled(snapshot) = outcome else {
        panic!("queued cancel must go terminal immediately");
    };
    assert_eq!(snapshot.state, JobState::Cancelled);
    assert_eq!(
        snapshot.error.expect("error detail").code,
        FailureCode::Cancelled
    );

    // unblock the pool and let the scheduler reach the cancelled entry
    orchestrator.cancel(blocker.id).await.unwrap();
    wait_for_terminal(&orchestrator, blocker.id).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // the cancelled job's URL never reached the downloader
    let spawned = std::fs::read_to_string(&marker).unwrap_or_default();
    assert!(!spawned.contains("v=queued"));
}

#[tokio::test]
async fn cancelling_a_running_job_terminates_the_child() {
    let harness = start_with_script("exec sleep 30").await;

    let job = submit(&harness, "https://example.com/watch?v=longrunning");
    wait_for_state(&harness.orchestrator, job.id, JobState::Running).await;

    let started = Instant::now();
    let outcome = harness.orchestrator.cancel(job.id).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::CancelRequested(_)));

    let done = wait_for_terminal(&harness.orchestrator, job.id).await;
    assert_eq!(done.state, JobState::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(done.artifact.is_none());

    // cancel is idempotent once terminal
    let again = harness.orchestrator.cancel(job.id).await.unwrap();
    assert!(matches!(again, CancelOutcome::AlreadyTerminal(_)));
}

#[tokio::test]
async fn overrunning_download_times_out() {
    let harness = start_with_script_and("exec sleep 30", |config| {
        config.downloader.timeout = mediafetch::humanize::HumanDuration(Duration::from_millis(400));
        config.downloader.kill_grace =
            mediafetch::humanize::HumanDuration(Duration::from_millis(150));
    })
    .await;

    let started = Instant::now();
    let job = submit(&harness, "https://example.com/watch?v=slow");
    let done = wait_for_terminal(&harness.orchestrator, job.id).await;

    assert_eq!(done.state, JobState::TimedOut);
    assert_eq!(done.error.expect("error detail").code, FailureCode::Timeout);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn queued_job_is_admitted_when_a_slot_frees() {
    let harness = start_with_script_and(
        r#"sleep 0.3
touch "$out/clip.mp4"
exit 0"#,
        |config| config.scheduler.max_concurrency = 1,
    )
    .await;

    let first = submit(&harness, "https://example.com/watch?v=first");
    wait_for_state(&harness.orchestrator, first.id, JobState::Running).await;

    let second = submit(&harness, "https://example.com/watch?v=second");
    assert_eq!(second.state, JobState::Queued);

    wait_for_terminal(&harness.orchestrator, first.id).await;
    let done = wait_for_terminal(&harness.orchestrator, second.id).await;
    assert_eq!(done.state, JobState::Succeeded);
}

#[tokio::test]
async fn retention_sweep_evicts_expired_terminal_jobs() {
    let harness = start_with_script_and(
        r#"touch "$out/clip.mp4"
exit 0"#,
        |config| config.retention.job_ttl = mediafetch::humanize::HumanDuration::from_secs(0),
    )
    .await;

    let job = submit(&harness, "https://example.com/watch?v=ephemeral");
    let done = wait_for_terminal(&harness.orchestrator, job.id).await;
    let artifact = done.artifact.expect("artifact path");
    assert!(artifact.exists());

    let stats = harness.orchestrator.sweep_now().await;
    assert_eq!(stats.jobs_removed, 1);
    assert!(harness.orchestrator.status(job.id).is_none());
    assert!(!artifact.exists());
}

#[tokio::test]
async fn retention_cap_keeps_only_the_newest_terminal_jobs() {
    let harness = start_with_script_and(
        r#"touch "$out/clip.mp4"
exit 0"#,
        |config| config.retention.max_terminal_jobs = 1,
    )
    .await;

    let mut ids = Vec::new();
    for n in 0..3 {
        let job = submit(&harness, &format!("https://example.com/watch?v=cap{n}"));
        wait_for_terminal(&harness.orchestrator, job.id).await;
        ids.push(job.id);
    }

    let stats = harness.orchestrator.sweep_now().await;
    assert_eq!(stats.jobs_removed, 2);
    assert!(harness.orchestrator.status(ids[0]).is_none());
    assert!(harness.orchestrator.status(ids[1]).is_none());
    assert!(harness.orchestrator.status(ids[2]).is_some());
}

#[tokio::test]
async fn in_flight_jobs_are_never_swept() {
    let harness = start_with_script_and("exec sleep 30", |config| {
        config.retention.job_ttl = mediafetch::humanize::HumanDuration::from_secs(0)
    })
    .await;

    let job = submit(&harness, "https://example.com/watch?v=inflight");
    wait_for_state(&harness.orchestrator, job.id, JobState::Running).await;

    let stats = harness.orchestrator.sweep_now().await;
    assert_eq!(stats.jobs_removed, 0);
    assert!(harness.orchestrator.status(job.id).is_some());

    harness.orchestrator.cancel(job.id).await.unwrap();
    wait_for_terminal(&harness.orchestrator, job.id).await;
}

#[tokio::test]
async fn health_reports_pool_state() {
    let harness = start_with_script(
        r#"touch "$out/clip.mp4"
exit 0"#,
    )
    .await;

    let health = harness.orchestrator.health().await;
    assert_eq!(health.status, ServiceStatus::Ok);
    assert_eq!(health.downloader_version.as_deref(), Some("fake-dl 2025.06.09"));
    assert!(health.downloader_error.is_none());
    assert!(!health.saturated);
}

#[tokio::test]
async fn status_of_unknown_job_is_none() {
    let harness = start_with_script("exit 0").await;
    assert!(harness.orchestrator.status(Uuid::now_v7()).is_none());
}
