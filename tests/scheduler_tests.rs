//! End-to-end runs of the scheduler against scripted generators.
//!
//! All tests run on tokio's paused clock, so 45s cooldowns and 2s backoffs
//! elapse instantly while keeping their ordering.


use std::sync::Arc;
use std::time::Duration;

use keyrotor::config::RunConfig;
use keyrotor::error::QueueError;
use keyrotor::scheduler::{GenerationMode, JobStatus, RunEvent, RunPhase, Scheduler};
use keyrotor::worker::GenerateError;
use test_harness::{assert_eventually, keys, scheduler_with, ScriptedGenerator};

#[tokio::test(start_paused = true)]
async fn test_ten_jobs_three_keys_all_complete() {
    let generator = Arc::new(ScriptedGenerator::succeeding());
    let (scheduler, _ids) = scheduler_with(generator.clone(), 10, 10).await;

    let handle = scheduler.start(GenerationMode::Idea, keys(3)).await.unwrap();
    assert_eq!(handle.workers(), 3);

    let report = handle.wait().await.unwrap();
    assert!(!report.cancelled);
    assert_eq!(report.workers, 3);
    assert_eq!(report.counts.completed, 10);
    assert_eq!(report.counts.failed, 0);
    assert_eq!(report.counts.pending, 0);
    assert!(report.elapsed_ms < 3_000, "took {}ms", report.elapsed_ms);

    assert_eq!(generator.calls(), 10);
    assert!(generator.max_in_flight() <= 3);
    assert_eq!(generator.double_booked(), 0);
    assert_eq!(scheduler.phase(), RunPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_capped_by_key_count() {
    let generator = Arc::new(ScriptedGenerator::succeeding().with_latency(Duration::from_millis(500)));
    let (scheduler, _ids) = scheduler_with(generator.clone(), 5, 12).await;

    let handle = scheduler.start(GenerationMode::Prompt, keys(2)).await.unwrap();
    assert_eq!(handle.workers(), 2);
    let report = handle.wait().await.unwrap();

    assert_eq!(report.counts.completed, 12);
    assert_eq!(generator.max_in_flight(), 2);
    assert_eq!(generator.double_booked(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_configured_workers_throttle_below_key_count() {
    let generator = Arc::new(ScriptedGenerator::succeeding().with_latency(Duration::from_millis(500)));
    let (scheduler, _ids) = scheduler_with(generator.clone(), 2, 8).await;

    let handle = scheduler.start(GenerationMode::Metadata, keys(6)).await.unwrap();
    assert_eq!(handle.workers(), 2);
    handle.wait().await.unwrap();

    assert_eq!(generator.max_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_job_completes_after_cooldown() {
    let generator = Arc::new(
        ScriptedGenerator::succeeding().then_fail(GenerateError::http(429, "Too Many Requests")),
    );
    let (scheduler, ids) = scheduler_with(generator.clone(), 10, 1).await;
    let mut events = scheduler.subscribe_events();

    let handle = scheduler.start(GenerationMode::Idea, keys(1)).await.unwrap();

    loop {
        match events.recv().await.unwrap() {
            RunEvent::KeyCoolingDown {
                job_id,
                key_number,
                cooldown_ms,
            } => {
                assert_eq!(job_id, ids[0]);
                assert_eq!(key_number, 1);
                assert_eq!(cooldown_ms, 45_000);
                break;
            }
            RunEvent::JobFailed { .. } | RunEvent::Finished(_) => {
                panic!("rate limit must not fail the job")
            }
            _ => {}
        }
    }
    let job = scheduler.store().get(&ids[0]).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.error.is_none());

    let report = handle.wait().await.unwrap();
    assert_eq!(report.counts.completed, 1);

    let log = generator.log();
    assert_eq!(log.len(), 2);
    assert!(
        log[1].at.duration_since(log[0].at) >= Duration::from_secs(45),
        "key reused before its cooldown passed"
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_moves_work_to_other_keys() {
    let generator = Arc::new(
        ScriptedGenerator::succeeding()
            .with_latency(Duration::from_millis(100))
            .then_fail(GenerateError::provider("You exceeded your current quota")),
    );
    let (scheduler, _ids) = scheduler_with(generator.clone(), 2, 6).await;

    let report = scheduler
        .start(GenerationMode::Idea, keys(2))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.counts.completed, 6);
    let log = generator.log();
    let limited_key = &log[0].key;
    let later_on_limited: Vec<_> = log[1..]
        .iter()
        .filter(|c| &c.key == limited_key && c.at.duration_since(log[0].at) < Duration::from_secs(45))
        .collect();
    assert!(later_on_limited.is_empty(), "cooling key was used again");
    assert!(report.elapsed_ms < 45_000, "other key should carry the batch");
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_releases_key_immediately() {
    let generator = Arc::new(
        ScriptedGenerator::succeeding().then_fail(GenerateError::provider("invalid request")),
    );
    let (scheduler, ids) = scheduler_with(generator.clone(), 10, 2).await;

    let report = scheduler
        .start(GenerationMode::Metadata, keys(1))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let failed = scheduler.store().get(&ids[0]).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    let error = failed.error.unwrap();
    assert!(!error.is_empty());
    assert!(error.chars().count() <= 100);
    assert!(failed.result.is_none());

    let next = scheduler.store().get(&ids[1]).await.unwrap();
    assert_eq!(next.status, JobStatus::Completed);

    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.counts.completed, 1);
    assert!(report.elapsed_ms < 10_000, "key was cooled instead of released");
}

#[tokio::test(start_paused = true)]
async fn test_long_error_is_truncated() {
    let long = format!("invalid argument: {}", "x".repeat(400));
    let generator = Arc::new(ScriptedGenerator::succeeding().then_fail(GenerateError::provider(long)));
    let (scheduler, ids) = scheduler_with(generator, 1, 1).await;

    scheduler
        .start(GenerationMode::Idea, keys(1))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let job = scheduler.store().get(&ids[0]).await.unwrap();
    assert_eq!(job.error.unwrap().chars().count(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_zero_credentials_rejected_without_side_effects() {
    let generator = Arc::new(ScriptedGenerator::succeeding());
    let (scheduler, _ids) = scheduler_with(generator.clone(), 5, 3).await;
    let before = scheduler.store().snapshot().await;

    let err = scheduler.start(GenerationMode::Idea, Vec::new()).await.err().unwrap();
    assert!(matches!(err, QueueError::NoCredentials));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(generator.calls(), 0);
    assert_eq!(scheduler.store().snapshot().await, before);
    assert_eq!(scheduler.phase(), RunPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_empty_store_rejected() {
    let scheduler = Scheduler::new(Arc::new(ScriptedGenerator::succeeding()), RunConfig::default());
    let err = scheduler.start(GenerationMode::Idea, keys(2)).await.err().unwrap();
    assert!(matches!(err, QueueError::NoJobs));
    assert_eq!(scheduler.phase(), RunPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_second_start_rejected_while_running() {
    let generator = Arc::new(ScriptedGenerator::succeeding().with_latency(Duration::from_secs(1)));
    let (scheduler, _ids) = scheduler_with(generator, 2, 4).await;

    let handle = scheduler.start(GenerationMode::Idea, keys(2)).await.unwrap();
    let err = scheduler.start(GenerationMode::Idea, keys(2)).await.err().unwrap();
    assert!(matches!(err, QueueError::AlreadyRunning));
    assert!(matches!(scheduler.clear().await, Err(QueueError::AlreadyRunning)));

    handle.wait().await.unwrap();
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_delete_rejected_while_processing() {
    let generator = Arc::new(ScriptedGenerator::succeeding().with_latency(Duration::from_secs(5)));
    let (scheduler, ids) = scheduler_with(generator, 1, 1).await;
    let handle = scheduler.start(GenerationMode::Idea, keys(1)).await.unwrap();

    let store = scheduler.store().clone();
    let id = ids[0];
    assert_eventually(
        || {
            let store = store.clone();
            async move { store.get(&id).await.map(|j| j.status) == Some(JobStatus::Processing) }
        },
        Duration::from_secs(2),
        "job should start processing",
    )
    .await;

    let err = scheduler.delete_job(&id).await.unwrap_err();
    assert!(matches!(err, QueueError::JobProcessing(_)));
    assert_eq!(store.get(&id).await.unwrap().status, JobStatus::Processing);

    handle.wait().await.unwrap();
    assert_eq!(store.get(&id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_deleted_pending_job_is_skipped() {
    let generator = Arc::new(ScriptedGenerator::succeeding().with_latency(Duration::from_secs(2)));
    let (scheduler, ids) = scheduler_with(generator.clone(), 1, 3).await;
    let handle = scheduler.start(GenerationMode::Idea, keys(1)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let removed = scheduler.delete_job(&ids[2]).await.unwrap();
    assert_eq!(removed.id, ids[2]);

    let report = handle.wait().await.unwrap();
    assert_eq!(report.counts.total, 2);
    assert_eq!(report.counts.completed, 2);
    assert_eq!(generator.calls(), 2);
    assert!(generator.log().iter().all(|c| c.job_id != ids[2]));
}

#[tokio::test(start_paused = true)]
async fn test_retry_failed_job_until_completed() {
    let generator = Arc::new(
        ScriptedGenerator::succeeding()
            .then_fail(GenerateError::provider("invalid request"))
            .then_fail(GenerateError::http(400, "bad image")),
    );
    let (scheduler, ids) = scheduler_with(generator, 1, 1).await;
    let id = ids[0];

    for _ in 0..2 {
        scheduler
            .start(GenerationMode::Metadata, keys(1))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(scheduler.store().get(&id).await.unwrap().status, JobStatus::Failed);
        scheduler.retry_job(&id).await.unwrap();
        assert_eq!(scheduler.store().get(&id).await.unwrap().status, JobStatus::Pending);
    }

    scheduler
        .start(GenerationMode::Metadata, keys(1))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    let job = scheduler.store().get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error.is_none());
    assert!(job.result.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_next_start_picks_up_failed_jobs() {
    let generator = Arc::new(
        ScriptedGenerator::succeeding().then_fail(GenerateError::provider("invalid request")),
    );
    let (scheduler, ids) = scheduler_with(generator.clone(), 1, 3).await;

    let first = scheduler
        .start(GenerationMode::Idea, keys(1))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(first.counts.failed, 1);

    let second = scheduler
        .start(GenerationMode::Idea, keys(1))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(second.counts.completed, 3);
    assert_eq!(generator.calls(), 4);
    assert_eq!(generator.log()[3].job_id, ids[0]);
}

#[tokio::test(start_paused = true)]
async fn test_completed_batch_is_regenerated() {
    let generator = Arc::new(ScriptedGenerator::succeeding());
    let (scheduler, _ids) = scheduler_with(generator.clone(), 2, 3).await;

    for _ in 0..2 {
        let report = scheduler
            .start(GenerationMode::Prompt, keys(2))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(report.counts.completed, 3);
    }
    assert_eq!(generator.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_stop_finishes_in_flight_and_keeps_rest_pending() {
    let generator = Arc::new(ScriptedGenerator::succeeding().with_latency(Duration::from_secs(1)));
    let (scheduler, _ids) = scheduler_with(generator.clone(), 1, 10).await;

    let handle = scheduler.start(GenerationMode::Idea, keys(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    handle.stop();
    let report = handle.wait().await.unwrap();

    assert!(report.cancelled);
    assert!(report.counts.completed >= 1 && report.counts.completed < 10);
    assert_eq!(report.counts.processing, 0);
    assert_eq!(
        report.counts.completed + report.counts.failed + report.counts.pending,
        10
    );
    assert_eq!(generator.calls(), report.counts.completed);
    assert_eq!(scheduler.phase(), RunPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_stop_cancels_active_run() {
    let generator = Arc::new(ScriptedGenerator::succeeding().with_latency(Duration::from_secs(1)));
    let (scheduler, _ids) = scheduler_with(generator, 1, 5).await;

    let handle = scheduler.start(GenerationMode::Idea, keys(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    scheduler.stop().await;

    let report = handle.wait().await.unwrap();
    assert!(report.cancelled);
    assert!(report.counts.pending > 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_job_lost_under_mixed_failures() {
    let generator = Arc::new(
        ScriptedGenerator::succeeding()
            .with_latency(Duration::from_millis(250))
            .then_fail(GenerateError::http(429, "rate limited"))
            .then_fail(GenerateError::provider("invalid request"))
            .then_succeed()
            .then_fail(GenerateError::provider("The model is overloaded"))
            .then_fail(GenerateError::provider("API key not valid"))
            .then_fail(GenerateError::provider("fetch failed"))
            .then_succeed()
            .then_fail(GenerateError::provider("Request timeout")),
    );
    let (scheduler, _ids) = scheduler_with(generator.clone(), 3, 15).await;

    let report = scheduler
        .start(GenerationMode::Metadata, keys(3))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.counts.total, 15);
    assert_eq!(report.counts.failed, 2);
    assert_eq!(report.counts.completed, 13);
    assert_eq!(report.counts.processing, 0);
    assert_eq!(generator.double_booked(), 0);
    // 15 jobs, 4 transient retries
    assert_eq!(generator.calls(), 19);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_call_returns_job_to_pending() {
    let generator = Arc::new(ScriptedGenerator::succeeding().then_fail(GenerateError::Aborted));
    let (scheduler, ids) = scheduler_with(generator.clone(), 1, 2).await;

    let report = scheduler
        .start(GenerationMode::Idea, keys(1))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let job = scheduler.store().get(&ids[0]).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.error.is_none());
    assert_eq!(report.counts.completed, 1);
    assert_eq!(report.counts.failed, 0);
    assert!(report.elapsed_ms < 10_000, "aborted call must not cool the key");
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_events_and_phases() {
    let generator = Arc::new(ScriptedGenerator::succeeding().with_latency(Duration::from_millis(100)));
    let (scheduler, _ids) = scheduler_with(generator, 2, 4).await;
    let mut events = scheduler.subscribe_events();
    let mut phase = scheduler.subscribe_phase();

    let handle = scheduler.start(GenerationMode::Idea, keys(2)).await.unwrap();
    assert_eq!(*phase.borrow_and_update(), RunPhase::Running);

    let mut seen_phases = vec![RunPhase::Running];
    while phase.changed().await.is_ok() {
        let current = *phase.borrow_and_update();
        seen_phases.push(current);
        if current == RunPhase::Idle {
            break;
        }
    }
    assert_eq!(
        seen_phases,
        vec![RunPhase::Running, RunPhase::Draining, RunPhase::Idle]
    );

    let report = handle.wait().await.unwrap();

    match events.recv().await.unwrap() {
        RunEvent::Started { queued, workers, .. } => {
            assert_eq!(queued, 4);
            assert_eq!(workers, 2);
        }
        other => panic!("expected Started, got {other:?}"),
    }
    let mut successes = 0;
    loop {
        match events.recv().await.unwrap() {
            RunEvent::JobSucceeded { key_number, .. } => {
                assert!((1..=2).contains(&key_number));
                successes += 1;
            }
            RunEvent::Finished(finished) => {
                assert_eq!(finished, report);
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(successes, 4);
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_published_during_run() {
    let generator = Arc::new(ScriptedGenerator::succeeding().with_latency(Duration::from_secs(1)));
    let (scheduler, _ids) = scheduler_with(generator, 1, 3).await;
    let mut snapshots = scheduler.store().subscribe();

    let handle = scheduler.start(GenerationMode::Idea, keys(1)).await.unwrap();

    let mut updates = 0;
    while snapshots.changed().await.is_ok() {
        updates += 1;
        let all_done = snapshots
            .borrow_and_update()
            .iter()
            .all(|j| j.status == JobStatus::Completed);
        if all_done {
            break;
        }
    }
    assert!(updates > 1, "expected periodic snapshots, got {updates}");

    handle.wait().await.unwrap();
    let last = snapshots.borrow().clone();
    assert_eq!(last.len(), 3);
    assert!(last.iter().all(|j| j.status == JobStatus::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_generator_fails_job_and_frees_key() {
    let generator = Arc::new(ScriptedGenerator::succeeding().then_panic());
    let (scheduler, ids) = scheduler_with(generator.clone(), 1, 2).await;

    let handle = scheduler.start(GenerationMode::Idea, keys(1)).await.unwrap();
    let report = tokio::time::timeout(Duration::from_secs(3_600), handle.wait())
        .await
        .expect("run should finish after a generator panic")
        .unwrap();

    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.counts.completed, 1);
    assert_eq!(report.counts.processing, 0);
    assert!(report.elapsed_ms < 10_000, "key was not released after the panic");
    assert_eq!(scheduler.phase(), RunPhase::Idle);

    let failed = scheduler.store().get(&ids[0]).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    let error = failed.error.unwrap();
    assert!(error.starts_with("generation task failed"), "{error}");
    assert!(error.chars().count() <= 100);

    // The store is usable again: the failed job runs on the next start.
    let rerun = scheduler
        .start(GenerationMode::Idea, keys(1))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(rerun.counts.completed, 2);
    assert_eq!(generator.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_phase_returns_to_running_when_job_requeued() {
    let generator = Arc::new(
        ScriptedGenerator::succeeding()
            .with_latency(Duration::from_secs(1))
            .then_fail(GenerateError::http(429, "rate limited")),
    );
    let (scheduler, _ids) = scheduler_with(generator, 2, 1).await;
    let mut phase = scheduler.subscribe_phase();

    let handle = scheduler.start(GenerationMode::Idea, keys(2)).await.unwrap();
    assert_eq!(handle.workers(), 2);
    let mut seen = vec![*phase.borrow_and_update()];
    while phase.changed().await.is_ok() {
        let current = *phase.borrow_and_update();
        seen.push(current);
        if current == RunPhase::Idle {
            break;
        }
    }
    handle.wait().await.unwrap();

    // The idle worker drains first, the rate-limited job brings the run
    // back, and the second key finishes it.
    assert_eq!(
        seen,
        vec![
            RunPhase::Running,
            RunPhase::Draining,
            RunPhase::Running,
            RunPhase::Draining,
            RunPhase::Idle,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_requeued_job_is_not_reported_as_draining() {
    let generator = Arc::new(
        ScriptedGenerator::succeeding()
            .with_latency(Duration::from_secs(1))
            .then_fail(GenerateError::http(429, "rate limited"))
            .then_fail(GenerateError::http(429, "rate limited")),
    );
    let (scheduler, ids) = scheduler_with(generator, 2, 1).await;

    let handle = scheduler.start(GenerationMode::Idea, keys(2)).await.unwrap();
    // Both keys are cooling down and the job waits in the queue.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(scheduler.phase(), RunPhase::Running);
    assert_eq!(
        scheduler.store().get(&ids[0]).await.unwrap().status,
        JobStatus::Pending
    );

    let report = handle.wait().await.unwrap();
    assert_eq!(report.counts.completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_key_backoff_keeps_queue_order() {
    let generator = Arc::new(
        ScriptedGenerator::succeeding()
            .with_latency(Duration::from_secs(1))
            .then_fail(GenerateError::http(429, "rate limited")),
    );
    let (scheduler, ids) = scheduler_with(generator.clone(), 2, 5).await;

    let handle = scheduler.start(GenerationMode::Prompt, keys(2)).await.unwrap();
    assert_eq!(handle.workers(), 2);
    let report = handle.wait().await.unwrap();
    assert_eq!(report.counts.completed, 5);

    // One key is cooling, so the two workers take turns on the other one.
    // A worker that finds no key puts its job back at the head, and the
    // limited job waits at the tail.
    let log = generator.log();
    let limited = log[0].job_id;
    let rest: Vec<_> = log[2..].iter().map(|c| c.job_id).collect();
    assert_eq!(rest, vec![ids[2], ids[3], ids[4], limited]);
    assert_eq!(generator.double_booked(), 0);
}
