//! Transcode coordinator lifecycle tests
//!
//! Drives the coordinator directly with the fake executor: job reuse, event
//! ordering and temp file cleanup.

mod helpers;

use cadence_ap::pipeline::transcode::{JobEvent, JobStatus, TempFileRegistry, TranscodeCoordinator};
use helpers::{settle, track, FakeExecutor};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn coordinator() -> (TranscodeCoordinator, FakeExecutor, TempFileRegistry, TempDir) {
    let temp = TempDir::new().unwrap();
    let registry = TempFileRegistry::new(temp.path(), "cadence-test");
    let executor = FakeExecutor::default();
    let coordinator = TranscodeCoordinator::new(Arc::new(executor.clone()), registry.clone());
    (coordinator, executor, registry, temp)
}

#[tokio::test(start_paused = true)]
async fn test_progress_then_completion() {
    let (mut coordinator, executor, registry, _temp) = coordinator();
    let a = track("A", "a.ape");
    let mut subscription = coordinator.start_job(&a, "https://cdn.test/a.ape");

    assert_eq!(subscription.track_id(), &a.id);
    assert_eq!(coordinator.job(&a.id).unwrap().status, JobStatus::Running);
    assert_eq!(coordinator.in_flight(), 1);

    executor.progress(0, 12.5);
    executor.progress(0, 140.0);
    let output = executor.complete(0);

    assert_eq!(subscription.recv().await, Some(JobEvent::Progress(12.5)));
    // Never reports 100% before the file exists
    assert_eq!(subscription.recv().await, Some(JobEvent::Progress(99.0)));
    assert_eq!(
        subscription.recv().await,
        Some(JobEvent::Completed(output.clone()))
    );

    let job = coordinator.job(&a.id).unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.output_path, Some(output.clone()));
    assert!(registry.contains(&output));
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_running_job_is_rejoined_not_relaunched() {
    let (mut coordinator, executor, _registry, _temp) = coordinator();
    let a = track("A", "a.ape");

    let first = coordinator.start_job(&a, "https://cdn.test/a.ape");
    coordinator.release(&a.id);
    drop(first);

    let mut second = coordinator.start_job(&a, "https://cdn.test/a.ape?fresh");
    assert_eq!(executor.launched(), 1);

    let output = executor.complete(0);
    assert_eq!(second.recv().await, Some(JobEvent::Completed(output.clone())));
    assert!(output.exists(), "rejoined job keeps its output");
}

#[tokio::test(start_paused = true)]
async fn test_finished_job_is_replaced_on_restart() {
    let (mut coordinator, executor, registry, _temp) = coordinator();
    let a = track("A", "a.ape");

    let mut first = coordinator.start_job(&a, "https://cdn.test/a.ape");
    let old_output = executor.complete(0);
    assert!(matches!(first.recv().await, Some(JobEvent::Completed(_))));

    let _second = coordinator.start_job(&a, "https://cdn.test/a.ape");
    assert_eq!(executor.launched(), 2);
    assert!(!old_output.exists());
    assert!(!registry.contains(&old_output));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_output_is_deleted() {
    let (mut coordinator, executor, registry, _temp) = coordinator();
    let a = track("A", "a.ape");

    let subscription = coordinator.start_job(&a, "https://cdn.test/a.ape");
    coordinator.release(&a.id);
    drop(subscription);

    let output = executor.complete(0);
    settle().await;

    assert!(!output.exists());
    assert!(registry.is_empty());
    assert!(coordinator.job(&a.id).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_subscription_counts_as_abandoned() {
    let (mut coordinator, executor, registry, _temp) = coordinator();
    let a = track("A", "a.ape");

    drop(coordinator.start_job(&a, "https://cdn.test/a.ape"));
    let output = executor.complete(0);
    settle().await;

    assert!(!output.exists());
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_progress_after_terminal() {
    let (mut coordinator, executor, _registry, _temp) = coordinator();
    let a = track("A", "a.ape");
    let mut subscription = coordinator.start_job(&a, "https://cdn.test/a.ape");

    executor.fail(0, "no such codec");
    executor.progress(0, 50.0);
    settle().await;

    match subscription.recv().await {
        Some(JobEvent::Failed(reason)) => assert!(reason.contains("no such codec")),
        other => panic!("expected failure, got {:?}", other),
    }
    let quiet = tokio::time::timeout(Duration::from_secs(1), subscription.recv()).await;
    assert!(quiet.is_err(), "unexpected event after failure: {:?}", quiet);
    assert_eq!(coordinator.job(&a.id).unwrap().status, JobStatus::Failed);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_vanished_transcoder_fails_the_job() {
    let (mut coordinator, executor, registry, _temp) = coordinator();
    let a = track("A", "a.ape");
    let mut subscription = coordinator.start_job(&a, "https://cdn.test/a.ape");

    executor.vanish(0);

    match subscription.recv().await {
        Some(JobEvent::Failed(reason)) => assert!(reason.contains("without reporting")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_sweeps_everything() {
    let (mut coordinator, executor, registry, _temp) = coordinator();
    let a = track("A", "a.ape");
    let b = track("B", "b.ape");

    let mut done = coordinator.start_job(&a, "https://cdn.test/a.ape");
    let _running = coordinator.start_job(&b, "https://cdn.test/b.ape");
    let output = executor.complete(0);
    assert!(matches!(done.recv().await, Some(JobEvent::Completed(_))));

    coordinator.shutdown();

    assert!(!output.exists());
    assert!(registry.is_empty());
    assert!(coordinator.job(&a.id).is_none());
    assert!(coordinator.job(&b.id).is_some(), "running job finishes in the background");
}
