use super::*;
use itr_common::mock::{Call, CallLog, MockCluster, RecordingMetrics, RecordingNotifier};
use itr_common::testing::init_test_logging;
use itr_common::{ClusterError, JobInfo, JobPhase, ProgressEvent};
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    log: CallLog,
    cluster: Arc<MockCluster>,
    metrics: Arc<RecordingMetrics>,
    notifier: Arc<RecordingNotifier>,
    logs_dir: TempDir,
    controller: RunController,
}

fn harness(build: impl FnOnce(CallLog) -> MockCluster) -> Harness {
    init_test_logging();
    let log = CallLog::new();
    let cluster = Arc::new(build(log.clone()));
    let metrics = Arc::new(RecordingMetrics::new(log.clone()));
    let notifier = Arc::new(RecordingNotifier::new(log.clone()));
    let logs_dir = tempfile::tempdir().unwrap();
    let controller = RunController::new(
        cluster.clone(),
        metrics.clone(),
        notifier.clone(),
        LogStore::new(logs_dir.path(), "https://ci.example.com"),
        RunConfig::default(),
        Some("https://grafana.example.com/d/itr".to_string()),
    );
    Harness {
        log,
        cluster,
        metrics,
        notifier,
        logs_dir,
        controller,
    }
}

fn request(tests: &[&str]) -> RunRequest {
    RunRequest {
        branch: "develop".to_string(),
        commit: "abc1234".to_string(),
        tests: tests.iter().map(|t| t.to_string()).collect(),
    }
}

fn jobs(entries: &[(&str, JobPhase)]) -> Vec<JobInfo> {
    entries
        .iter()
        .map(|(name, phase)| JobInfo::new(*name, *phase))
        .collect()
}

fn assert_deleted_last_and_once(log: &CallLog) {
    let calls = log.calls();
    assert_eq!(
        calls.last(),
        Some(&Call::DeleteScope("develop-abc1234".to_string()))
    );
    assert_eq!(log.count(|c| matches!(c, Call::DeleteScope(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn provisioning_failure_makes_no_other_calls() {
    let h = harness(|log| {
        MockCluster::new(log).failing_create(ClusterError::Status {
            operation: "create_scope",
            status: 409,
            body: "namespace exists".to_string(),
        })
    });

    let outcome = h.controller.start(request(&["a", "b"])).wait().await.unwrap();

    assert_eq!(outcome.snapshot.status, RunStatus::FailedToStart);
    assert!(matches!(outcome.error, Some(RunError::Provisioning { .. })));
    assert_eq!(
        h.log.calls(),
        vec![Call::CreateScope("develop-abc1234".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn jobs_are_submitted_at_fixed_cadence() {
    let h = harness(MockCluster::new);
    let start = Instant::now();

    h.controller
        .start(request(&["a", "b", "c"]))
        .wait()
        .await
        .unwrap();

    let submissions = h.cluster.submissions();
    let offsets: Vec<_> = submissions.iter().map(|(_, at)| *at - start).collect();
    assert_eq!(
        offsets,
        [
            Duration::ZERO,
            Duration::from_millis(100),
            Duration::from_millis(200)
        ]
    );
    let names: Vec<_> = submissions.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn empty_scope_succeeds_on_sixth_poll() {
    let h = harness(MockCluster::new);
    let start = Instant::now();

    let handle = h.controller.start(request(&["a", "b"]));
    assert_eq!(handle.scope().as_str(), "develop-abc1234");
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.snapshot.status, RunStatus::CompletedSuccess);
    assert_eq!(outcome.snapshot.poll_count, 6);
    assert_eq!(outcome.snapshot.submitted, 2);
    assert!(outcome.error.is_none());
    assert_eq!(h.cluster.list_calls(), 6);
    assert!(Instant::now() - start >= Duration::from_secs(360));
    assert_deleted_last_and_once(&h.log);

    let events: Vec<_> = h.metrics.records().iter().map(|r| r.event).collect();
    assert_eq!(events.first(), Some(&ProgressEvent::StartStop));
    assert_eq!(events.last(), Some(&ProgressEvent::StartStop));
    assert_eq!(
        events.iter().filter(|e| **e == ProgressEvent::Progress).count(),
        6
    );

    let messages = h.notifier.messages();
    assert!(messages[0].contains("Test `develop-abc1234` started"));
    assert!(messages[0].contains("https://grafana.example.com/d/itr"));
    let summary = messages.last().unwrap();
    assert!(summary.contains("Outcome:       completed"));
    assert!(summary.contains("Success Tests: 2"));
}

#[tokio::test(start_paused = true)]
async fn vanishing_jobs_still_need_minimum_polls() {
    let h = harness(|log| {
        MockCluster::new(log).with_jobs(|call| {
            if call <= 3 {
                Ok(jobs(&[
                    ("a", JobPhase::Running),
                    ("b", JobPhase::Pending),
                    ("c", JobPhase::Succeeded),
                ]))
            } else {
                Ok(Vec::new())
            }
        })
    });

    let outcome = h
        .controller
        .start(request(&["a", "b", "c"]))
        .wait()
        .await
        .unwrap();

    assert_eq!(outcome.snapshot.status, RunStatus::CompletedSuccess);
    assert_eq!(outcome.snapshot.poll_count, 6);

    let progress: Vec<_> = h
        .metrics
        .records()
        .into_iter()
        .filter(|r| r.event == ProgressEvent::Progress)
        .collect();
    assert_eq!(progress[0].num_pods, 3);
    assert_eq!(progress[0].completed, 1);
    assert_eq!(progress[0].remaining, 2);
    assert_eq!(progress[3].num_pods, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_job_is_reported_once_with_stored_log() {
    let h = harness(|log| {
        MockCluster::new(log)
            .with_log("name-register", "assertion failed: owner matches\n")
            .with_jobs(|call| {
                if call <= 4 {
                    Ok(jobs(&[
                        ("name-register", JobPhase::Failed),
                        ("name-renew", JobPhase::Running),
                    ]))
                } else {
                    Ok(Vec::new())
                }
            })
    });

    let outcome = h
        .controller
        .start(request(&["name_register", "name_renew"]))
        .wait()
        .await
        .unwrap();

    assert_eq!(outcome.snapshot.failed_jobs, ["name-register".to_string()]);
    assert_eq!(
        h.log
            .count(|c| matches!(c, Call::JobLogs(job) if job == "name-register")),
        1
    );

    let messages = h.notifier.messages();
    let failures: Vec<_> = messages
        .iter()
        .filter(|m| m.starts_with("Test `name-register` failed"))
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("https://ci.example.com/logs/develop-abc1234/name-register"));

    let stored = std::fs::read_to_string(
        h.logs_dir
            .path()
            .join("develop-abc1234")
            .join("name-register"),
    )
    .unwrap();
    assert_eq!(stored, "assertion failed: owner matches\n");

    let summary = messages.last().unwrap();
    assert!(summary.contains("Success Tests: 1"));
    assert!(summary.contains("Failed Tests:  name-register"));
    assert_deleted_last_and_once(&h.log);
}

#[tokio::test(start_paused = true)]
async fn stuck_job_stalls_run_and_collects_its_logs() {
    let h = harness(|log| {
        MockCluster::new(log).with_jobs(|_| Ok(jobs(&[("name-import", JobPhase::Running)])))
    });

    let outcome = h
        .controller
        .start(request(&["name_import"]))
        .wait()
        .await
        .unwrap();

    assert_eq!(outcome.snapshot.status, RunStatus::CompletedStalled);
    assert_eq!(outcome.snapshot.poll_count, 90);
    assert_eq!(h.cluster.list_calls(), 90);
    assert_eq!(
        h.log.count(|c| matches!(c, Call::JobLogs(job) if job == "name-import")),
        1
    );

    let messages = h.notifier.messages();
    assert!(
        messages
            .iter()
            .any(|m| m.starts_with("Test `name-import` stalled"))
    );
    let summary = messages
        .iter()
        .find(|m| m.starts_with("```"))
        .unwrap();
    assert!(summary.contains("Outcome:       stalled"));
    assert!(summary.contains("Stalled Tests: name-import"));
    assert!(h.logs_dir.path().join("develop-abc1234").join("name-import").is_file());
    assert_deleted_last_and_once(&h.log);
}

#[tokio::test(start_paused = true)]
async fn submission_failure_does_not_stop_the_run() {
    let h = harness(|log| MockCluster::new(log).failing_submission("b"));

    let outcome = h
        .controller
        .start(request(&["a", "b", "c"]))
        .wait()
        .await
        .unwrap();

    assert_eq!(h.cluster.submissions().len(), 3);
    assert_eq!(outcome.snapshot.submitted, 3);
    assert_eq!(outcome.snapshot.submission_failures, 1);
    assert_eq!(outcome.snapshot.status, RunStatus::CompletedSuccess);
}

#[tokio::test(start_paused = true)]
async fn failed_listings_never_count_as_empty() {
    let h = harness(|log| {
        MockCluster::new(log).with_jobs(|call| {
            if call <= 10 {
                Err(ClusterError::Transport("connection reset".to_string()))
            } else {
                Ok(Vec::new())
            }
        })
    });

    let outcome = h.controller.start(request(&["a"])).wait().await.unwrap();

    assert_eq!(outcome.snapshot.status, RunStatus::CompletedSuccess);
    assert_eq!(outcome.snapshot.poll_count, 11);
    let progress = h
        .metrics
        .records()
        .iter()
        .filter(|r| r.event == ProgressEvent::Progress)
        .count();
    assert_eq!(progress, 1);
}

#[tokio::test(start_paused = true)]
async fn node_listing_failure_reports_zero_nodes() {
    let h = harness(|log| MockCluster::new(log).failing_nodes());

    let outcome = h.controller.start(request(&["a"])).wait().await.unwrap();

    assert_eq!(outcome.snapshot.status, RunStatus::CompletedSuccess);
    let records = h.metrics.records();
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.num_nodes == 0));
}

#[tokio::test(start_paused = true)]
async fn slow_node_listing_does_not_delay_polls() {
    let h = harness(|log| MockCluster::new(log).slow_nodes(Duration::from_secs(50)));
    let start = Instant::now();

    let handle = h.controller.start(request(&["a"]));
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(handle.snapshot().poll_count, 1);
    let progress: Vec<_> = h
        .metrics
        .records()
        .into_iter()
        .filter(|r| r.event == ProgressEvent::Progress)
        .collect();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].num_nodes, 0);

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.snapshot.status, RunStatus::CompletedSuccess);
    assert_eq!(outcome.snapshot.poll_count, 6);
    assert!(Instant::now() - start < Duration::from_secs(370));
    assert_deleted_last_and_once(&h.log);
}

#[tokio::test(start_paused = true)]
async fn sink_failures_do_not_change_the_outcome() {
    init_test_logging();
    let log = CallLog::new();
    let cluster = Arc::new(MockCluster::new(log.clone()));
    let metrics = Arc::new(RecordingMetrics::new(log.clone()).failing());
    let notifier = Arc::new(RecordingNotifier::new(log.clone()));
    let dir = tempfile::tempdir().unwrap();
    let controller = RunController::new(
        cluster,
        metrics.clone(),
        notifier,
        LogStore::new(dir.path(), "http://localhost:8080"),
        RunConfig::default(),
        None,
    );

    let outcome = controller.start(request(&["a"])).wait().await.unwrap();

    assert_eq!(outcome.snapshot.status, RunStatus::CompletedSuccess);
    assert_eq!(metrics.records().len(), 8);
    assert_deleted_last_and_once(&log);
}

#[tokio::test(start_paused = true)]
async fn empty_test_list_skips_submission() {
    let h = harness(MockCluster::new);

    let outcome = h.controller.start(request(&[])).wait().await.unwrap();

    assert_eq!(outcome.snapshot.status, RunStatus::CompletedSuccess);
    assert!(h.cluster.submissions().is_empty());
    let progress = h
        .metrics
        .records()
        .into_iter()
        .find(|r| r.event == ProgressEvent::Progress)
        .unwrap();
    assert_eq!(progress.complete_percent, 0.0);
    assert_eq!(progress.remaining_percent, 0.0);
}

#[tokio::test(start_paused = true)]
async fn snapshots_are_published_while_running() {
    let h = harness(MockCluster::new);
    let handle = h.controller.start(request(&["a", "b"]));
    let mut rx = handle.subscribe();

    tokio::time::sleep(Duration::from_secs(61)).await;
    let mid = handle.snapshot();
    assert_eq!(mid.status, RunStatus::Polling);
    assert_eq!(mid.submitted, 2);
    assert_eq!(mid.poll_count, 1);
    assert!(!handle.is_finished());

    let outcome = handle.wait().await.unwrap();
    rx.changed().await.ok();
    assert_eq!(rx.borrow().status, outcome.snapshot.status);
    assert!(outcome.snapshot.status.is_terminal());
}
