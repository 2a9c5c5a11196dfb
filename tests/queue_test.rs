mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use remit::error::AppError;
use remit::queue::{JobError, JobQueue, JobState, NewJob, WorkerPool, QUEUE_PAYMENTS};

#[tokio::test]
async fn enqueue_then_claim_returns_the_job() -> anyhow::Result<()> {
    let pool = common::setup_pool().await?;
    let queue = JobQueue::new(pool);

    let job = queue
        .enqueue(NewJob::new("payment.create_intent", json!({"transaction_id": "t-1"})))
        .await?;
    assert_eq!(job.state, JobState::Available);
    assert_eq!(job.attempt, 0);

    let claimed = queue.claim(&[QUEUE_PAYMENTS]).await?.expect("job due");
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.state, JobState::Running);
    assert_eq!(claimed.attempt, 1);
    assert_eq!(claimed.args["transaction_id"], "t-1");

    Ok(())
}

#[tokio::test]
async fn lower_priority_value_claims_first() -> anyhow::Result<()> {
    let pool = common::setup_pool().await?;
    let queue = JobQueue::new(pool);

    let low = queue
        .enqueue(NewJob::new("a", json!({})).with_priority(5))
        .await?;
    let high = queue
        .enqueue(NewJob::new("b", json!({})).with_priority(1))
        .await?;

    let first = queue.claim(&[QUEUE_PAYMENTS]).await?.expect("job due");
    let second = queue.claim(&[QUEUE_PAYMENTS]).await?.expect("job due");

    assert_eq!(first.id, high.id);
    assert_eq!(second.id, low.id);

    Ok(())
}

#[tokio::test]
async fn claim_only_sees_requested_queues() -> anyhow::Result<()> {
    let pool = common::setup_pool().await?;
    let queue = JobQueue::new(pool);

    queue
        .enqueue(NewJob::new("notify", json!({})).on_queue("notifications"))
        .await?;

    assert!(queue.claim(&[QUEUE_PAYMENTS]).await?.is_none());
    assert!(queue.claim(&["notifications"]).await?.is_some());

    Ok(())
}

#[tokio::test]
async fn a_job_is_claimable_exactly_once() -> anyhow::Result<()> {
    let pool = common::setup_pool().await?;
    let queue = JobQueue::new(pool);

    queue.enqueue(NewJob::new("a", json!({}))).await?;

    assert!(queue.claim(&[QUEUE_PAYMENTS]).await?.is_some());
    assert!(queue.claim(&[QUEUE_PAYMENTS]).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn complete_settles_the_job() -> anyhow::Result<()> {
    let pool = common::setup_pool().await?;
    let queue = JobQueue::new(pool);

    queue.enqueue(NewJob::new("a", json!({}))).await?;
    let claimed = queue.claim(&[QUEUE_PAYMENTS]).await?.expect("job due");
    queue.complete(&claimed).await?;

    let settled = queue.find_by_id(claimed.id).await?.expect("job exists");
    assert_eq!(settled.state, JobState::Completed);
    assert!(settled.completed_at.is_some());

    Ok(())
}

#[tokio::test]
async fn retryable_failure_reschedules_with_backoff() -> anyhow::Result<()> {
    let pool = common::setup_pool().await?;
    let queue = JobQueue::new(pool);

    queue
        .enqueue(NewJob::new("a", json!({})).with_max_attempts(3))
        .await?;
    let claimed = queue.claim(&[QUEUE_PAYMENTS]).await?.expect("job due");

    queue
        .fail(
            &claimed,
            &JobError::Retryable(AppError::Provider("timeout".to_string())),
        )
        .await?;

    let rescheduled = queue.find_by_id(claimed.id).await?.expect("job exists");
    assert_eq!(rescheduled.state, JobState::Available);
    assert_eq!(rescheduled.last_error.as_deref(), Some("Provider error: timeout"));
    assert!(rescheduled.scheduled_at > Utc::now());

    // Not due yet, so it cannot be claimed.
    assert!(queue.claim(&[QUEUE_PAYMENTS]).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn exhausted_attempts_discard_the_job() -> anyhow::Result<()> {
    let pool = common::setup_pool().await?;
    let queue = JobQueue::new(pool);

    queue
        .enqueue(NewJob::new("a", json!({})).with_max_attempts(1))
        .await?;
    let claimed = queue.claim(&[QUEUE_PAYMENTS]).await?.expect("job due");

    queue
        .fail(
            &claimed,
            &JobError::Retryable(AppError::Provider("still down".to_string())),
        )
        .await?;

    let discarded = queue.find_by_id(claimed.id).await?.expect("job exists");
    assert_eq!(discarded.state, JobState::Discarded);
    assert!(discarded.last_error.is_some());

    Ok(())
}

#[tokio::test]
async fn fatal_errors_discard_immediately() -> anyhow::Result<()> {
    let pool = common::setup_pool().await?;
    let queue = JobQueue::new(pool);

    queue
        .enqueue(NewJob::new("a", json!({})).with_max_attempts(5))
        .await?;
    let claimed = queue.claim(&[QUEUE_PAYMENTS]).await?.expect("job due");

    queue
        .fail(
            &claimed,
            &JobError::Fatal(AppError::NotFound("row gone".to_string())),
        )
        .await?;

    let discarded = queue.find_by_id(claimed.id).await?.expect("job exists");
    assert_eq!(discarded.state, JobState::Discarded);
    assert_eq!(discarded.attempt, 1);

    Ok(())
}

#[tokio::test]
async fn jobs_with_no_registered_handler_are_discarded() -> anyhow::Result<()> {
    let pool = common::setup_pool().await?;
    let queue = Arc::new(JobQueue::new(pool));

    let job = queue.enqueue(NewJob::new("mystery.kind", json!({}))).await?;

    let workers = WorkerPool::new(
        queue.clone(),
        &[QUEUE_PAYMENTS],
        1,
        Duration::from_millis(10),
    );
    assert!(workers.tick().await?);

    let settled = queue.find_by_id(job.id).await?.expect("job exists");
    assert_eq!(settled.state, JobState::Discarded);

    Ok(())
}
