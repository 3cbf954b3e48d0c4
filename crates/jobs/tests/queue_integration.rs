//! Lifecycle and concurrency tests for the job queue.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use common::ManualClock;
use futures_util::future::join_all;
use jobs::{
    EnqueueOptions, InMemoryJobStore, InMemoryTransport, JobKind, JobOutcome, JobQueue,
    JobStatus, JobWorker, WorkerConfig,
};

type Queue = JobQueue<InMemoryJobStore>;
type Worker = JobWorker<InMemoryJobStore, InMemoryTransport>;

fn setup() -> (Queue, Worker, InMemoryTransport, ManualClock) {
    let clock = ManualClock::new(Utc::now());
    let queue = JobQueue::with_clock(InMemoryJobStore::new(), Arc::new(clock.clone()));
    let transport = InMemoryTransport::new();
    let worker = JobWorker::new(queue.clone(), transport.clone(), WorkerConfig::default());
    (queue, worker, transport, clock)
}

fn confirmation(order: &str) -> serde_json::Value {
    serde_json::json!({ "order_id": order, "to": "buyer@example.com" })
}

#[tokio::test]
async fn enqueue_then_deliver_completes_on_first_attempt() {
    let (queue, worker, transport, _) = setup();

    let job = queue
        .enqueue(JobKind::OrderConfirmation, confirmation("o-1"))
        .await
        .unwrap();
    worker.run_pending().await.unwrap();

    let job = queue.get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert_eq!(transport.delivered(), vec![job.id]);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.total(), 1);
}

#[tokio::test]
async fn failures_below_ceiling_leave_job_delayed() {
    let (queue, worker, transport, clock) = setup();
    let job = queue
        .enqueue_with(
            JobKind::OrderConfirmation,
            confirmation("o-2"),
            EnqueueOptions::new().max_attempts(5),
        )
        .await
        .unwrap();
    transport.set_fail_always(true);

    for _ in 0..3 {
        assert!(matches!(
            worker.process_next().await.unwrap(),
            Some(JobOutcome::Retrying { .. })
        ));
        // Past any backoff the policy can produce.
        clock.advance(Duration::minutes(10));
    }

    let job = queue.get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Delayed);
    assert_eq!(job.attempts, 3);
    assert!(job.last_error.is_some());
    assert!(transport.delivered().is_empty());
}

#[tokio::test]
async fn exhausted_job_fails_and_is_not_delivered_again() {
    let (queue, worker, transport, clock) = setup();
    let job = queue
        .enqueue(JobKind::PasswordReset, serde_json::json!({}))
        .await
        .unwrap();
    transport.set_fail_always(true);

    let mut outcomes = Vec::new();
    while let Some(outcome) = worker.process_next().await.unwrap() {
        outcomes.push(outcome);
        clock.advance(Duration::minutes(10));
    }

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes.last(), Some(&JobOutcome::Failed));
    let job = queue.get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);

    clock.advance(Duration::hours(1));
    transport.set_fail_always(false);
    assert_eq!(worker.process_next().await.unwrap(), None);
    assert_eq!(transport.attempt_count(), 3);
    assert_eq!(queue.stats().await.unwrap().failed, 1);
}

#[tokio::test]
async fn backoff_grows_between_attempts() {
    let (queue, worker, transport, clock) = setup();
    queue
        .enqueue_with(
            JobKind::Welcome,
            serde_json::json!({}),
            EnqueueOptions::new().max_attempts(4),
        )
        .await
        .unwrap();
    transport.set_fail_always(true);

    let mut delays = Vec::new();
    while let Some(outcome) = worker.process_next().await.unwrap() {
        if let JobOutcome::Retrying { retry_at } = outcome {
            delays.push(retry_at - common::Clock::now(&clock));
            clock.set(retry_at);
        }
    }

    assert_eq!(
        delays,
        vec![
            Duration::seconds(1),
            Duration::seconds(2),
            Duration::seconds(4)
        ]
    );
}

#[tokio::test]
async fn paused_queue_keeps_jobs_waiting_until_resume() {
    let (queue, worker, transport, _) = setup();

    queue.pause();
    let job = queue
        .enqueue(JobKind::OrderShipped, serde_json::json!({}))
        .await
        .unwrap();
    let summary = worker.run_pending().await.unwrap();

    assert_eq!(summary.processed(), 0);
    let stats = queue.stats().await.unwrap();
    assert!(stats.paused);
    assert_eq!(stats.waiting, 1);
    assert_eq!(stats.active, 0);
    assert_eq!(transport.attempt_count(), 0);

    queue.resume();
    worker.run_pending().await.unwrap();
    assert_eq!(
        queue.get(job.id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn clean_removes_only_old_terminal_jobs() {
    let (queue, worker, transport, clock) = setup();

    let old_waiting = queue
        .enqueue_with(
            JobKind::Welcome,
            serde_json::json!({}),
            EnqueueOptions::new().delay(Duration::days(30)),
        )
        .await
        .unwrap();
    let completed = queue
        .enqueue(JobKind::Welcome, serde_json::json!({}))
        .await
        .unwrap();
    worker.process_next().await.unwrap();

    let failed = queue
        .enqueue_with(
            JobKind::Welcome,
            serde_json::json!({}),
            EnqueueOptions::new().max_attempts(1),
        )
        .await
        .unwrap();
    transport.set_fail_always(true);
    worker.process_next().await.unwrap();

    clock.advance(Duration::days(2));
    let recent = queue
        .enqueue(JobKind::Welcome, serde_json::json!({}))
        .await
        .unwrap();
    transport.set_fail_always(false);
    worker.process_next().await.unwrap();

    let deleted = queue.clean(Duration::days(1)).await.unwrap();

    assert_eq!(deleted, 2);
    assert!(queue.get(completed.id).await.is_err());
    assert!(queue.get(failed.id).await.is_err());
    assert_eq!(
        queue.get(old_waiting.id).await.unwrap().status,
        JobStatus::Delayed
    );
    assert_eq!(
        queue.get(recent.id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn stuck_job_is_requeued_and_redelivered() {
    let (queue, worker, transport, clock) = setup();
    let job = queue
        .enqueue(JobKind::OrderConfirmation, confirmation("o-3"))
        .await
        .unwrap();

    // A worker claims the job and then disappears.
    worker.claim().await.unwrap().unwrap();
    clock.advance(Duration::minutes(4));
    assert_eq!(worker.requeue_stuck().await.unwrap().requeued, 0);

    clock.advance(Duration::minutes(2));
    assert_eq!(worker.requeue_stuck().await.unwrap().requeued, 1);
    assert_eq!(
        worker.process_next().await.unwrap(),
        Some(JobOutcome::Completed)
    );

    let job = queue.get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(transport.delivered(), vec![job.id]);
}

#[tokio::test]
async fn stuck_job_on_last_attempt_fails() {
    let (queue, worker, _, clock) = setup();
    let job = queue
        .enqueue_with(
            JobKind::Welcome,
            serde_json::json!({}),
            EnqueueOptions::new().max_attempts(1),
        )
        .await
        .unwrap();

    worker.claim().await.unwrap().unwrap();
    clock.advance(Duration::minutes(6));
    let outcome = worker.requeue_stuck().await.unwrap();

    assert_eq!(outcome.failed, 1);
    let job = queue.get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.last_error.as_deref(), Some("visibility timeout expired"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_never_share_a_job() {
    let (queue, worker, transport, _) = setup();
    transport.set_latency(std::time::Duration::from_millis(2));
    for i in 0..40 {
        queue
            .enqueue(JobKind::OrderConfirmation, confirmation(&format!("o-{i}")))
            .await
            .unwrap();
    }

    let passes = (0..4).map(|_| {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run_pending().await.unwrap() })
    });
    let summaries: Vec<_> = join_all(passes)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let completed: usize = summaries.iter().map(|s| s.completed).sum();
    assert_eq!(completed, 40);

    let delivered = transport.delivered();
    let unique: HashSet<_> = delivered.iter().collect();
    assert_eq!(delivered.len(), 40);
    assert_eq!(unique.len(), 40);
    assert_eq!(transport.attempt_count(), 40);
}
