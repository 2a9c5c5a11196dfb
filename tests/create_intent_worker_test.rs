mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use remit::domain::TransactionStatus;
use remit::payments::{FakeProvider, FeePolicy};
use remit::queue::{JobQueue, JobState, NewJob, WorkerPool, QUEUE_PAYMENTS};
use remit::repository::{SqliteTransactionRepository, TransactionRepository};
use remit::workers::{CreateIntentWorker, KIND_CREATE_INTENT};

struct Fixture {
    transactions: Arc<SqliteTransactionRepository>,
    provider: Arc<FakeProvider>,
    queue: Arc<JobQueue>,
    workers: WorkerPool,
    pool: sqlx::SqlitePool,
}

async fn fixture(fee_policy: FeePolicy) -> anyhow::Result<Fixture> {
    let pool = common::setup_pool().await?;
    let transactions = Arc::new(SqliteTransactionRepository::new(pool.clone()));
    let provider = Arc::new(FakeProvider::new());
    let queue = Arc::new(JobQueue::new(pool.clone()));

    let mut workers = WorkerPool::new(
        queue.clone(),
        &[QUEUE_PAYMENTS],
        1,
        Duration::from_millis(10),
    );
    workers.register(Arc::new(CreateIntentWorker::new(
        transactions.clone(),
        provider.clone(),
        fee_policy,
    )));

    Ok(Fixture {
        transactions,
        provider,
        queue,
        workers,
        pool,
    })
}

async fn enqueue_intent_job(
    fx: &Fixture,
    transaction_id: Uuid,
    max_attempts: i64,
) -> anyhow::Result<i64> {
    let job = fx
        .queue
        .enqueue(
            NewJob::new(KIND_CREATE_INTENT, json!({ "transaction_id": transaction_id }))
                .with_max_attempts(max_attempts),
        )
        .await?;
    Ok(job.id)
}

/// Force a rescheduled job to be due now so the next tick can claim it.
async fn make_due(fx: &Fixture, job_id: i64) -> anyhow::Result<()> {
    let past = (Utc::now() - chrono::Duration::minutes(5)).naive_utc();
    sqlx::query("UPDATE jobs SET scheduled_at = ? WHERE id = ?")
        .bind(past)
        .bind(job_id)
        .execute(&fx.pool)
        .await?;
    Ok(())
}

#[tokio::test]
async fn creates_intent_with_grossed_up_total() -> anyhow::Result<()> {
    let fx = fixture(common::stripe_fees()).await?;

    let transaction = fx
        .transactions
        .create(common::pending_intent_transaction(Uuid::new_v4(), 100.0))
        .await?;
    let job_id = enqueue_intent_job(&fx, transaction.id, 5).await?;

    assert!(fx.workers.tick().await?);

    let calls = fx.provider.intent_calls();
    assert_eq!(calls.len(), 1);
    // $100.00 base + $3.30 gross-up fee, charged in minor units.
    assert_eq!(calls[0].amount_minor_units, 10_330);
    assert_eq!(calls[0].currency, "usd");

    let updated = fx
        .transactions
        .find_by_id(transaction.id)
        .await?
        .expect("transaction exists");
    assert_eq!(updated.status, TransactionStatus::Pending);
    assert_eq!(updated.provider_payment_id.as_deref(), Some("pi_fake_1"));
    assert!(updated.provider_client_secret.is_some());
    assert_eq!(updated.processing_fee, Some(3.30));
    assert_eq!(updated.fee_percent, Some(2.9));
    assert_eq!(updated.fee_flat_cents, Some(30));
    assert_eq!(updated.fee_refundable, Some(false));
    assert!(updated.error_message.is_none());

    let job = fx.queue.find_by_id(job_id).await?.expect("job exists");
    assert_eq!(job.state, JobState::Completed);

    Ok(())
}

#[tokio::test]
async fn redelivered_job_does_not_call_the_provider_again() -> anyhow::Result<()> {
    let fx = fixture(common::stripe_fees()).await?;

    let transaction = fx
        .transactions
        .create(common::pending_intent_transaction(Uuid::new_v4(), 100.0))
        .await?;

    enqueue_intent_job(&fx, transaction.id, 5).await?;
    assert!(fx.workers.tick().await?);

    // Simulate the queue redelivering after a crash-before-complete.
    let second = enqueue_intent_job(&fx, transaction.id, 5).await?;
    assert!(fx.workers.tick().await?);

    assert_eq!(fx.provider.intent_calls().len(), 1);

    let updated = fx
        .transactions
        .find_by_id(transaction.id)
        .await?
        .expect("transaction exists");
    assert_eq!(updated.status, TransactionStatus::Pending);

    let job = fx.queue.find_by_id(second).await?.expect("job exists");
    assert_eq!(job.state, JobState::Completed);

    Ok(())
}

#[tokio::test]
async fn missing_transaction_is_a_permanent_failure() -> anyhow::Result<()> {
    let fx = fixture(common::stripe_fees()).await?;

    let job_id = enqueue_intent_job(&fx, Uuid::new_v4(), 5).await?;
    assert!(fx.workers.tick().await?);

    assert!(fx.provider.intent_calls().is_empty());

    let job = fx.queue.find_by_id(job_id).await?.expect("job exists");
    assert_eq!(job.state, JobState::Discarded);
    assert_eq!(job.attempt, 1);

    Ok(())
}

#[tokio::test]
async fn provider_outage_retries_then_marks_failed() -> anyhow::Result<()> {
    let fx = fixture(common::stripe_fees()).await?;
    fx.provider.fail_next_intents(2);

    let transaction = fx
        .transactions
        .create(common::pending_intent_transaction(Uuid::new_v4(), 100.0))
        .await?;
    let job_id = enqueue_intent_job(&fx, transaction.id, 2).await?;

    // First attempt: provider down. The row keeps pending_intent so the
    // retry is not short-circuited, but the error is recorded.
    assert!(fx.workers.tick().await?);
    let after_first = fx
        .transactions
        .find_by_id(transaction.id)
        .await?
        .expect("transaction exists");
    assert_eq!(after_first.status, TransactionStatus::PendingIntent);
    assert!(after_first.error_message.is_some());

    let job = fx.queue.find_by_id(job_id).await?.expect("job exists");
    assert_eq!(job.state, JobState::Available);

    // Final attempt: provider still down. Now the failure is terminal.
    make_due(&fx, job_id).await?;
    assert!(fx.workers.tick().await?);

    let after_second = fx
        .transactions
        .find_by_id(transaction.id)
        .await?
        .expect("transaction exists");
    assert_eq!(after_second.status, TransactionStatus::Failed);
    assert!(after_second.error_message.is_some());
    assert!(after_second.provider_payment_id.is_none());

    let job = fx.queue.find_by_id(job_id).await?.expect("job exists");
    assert_eq!(job.state, JobState::Discarded);

    Ok(())
}

#[tokio::test]
async fn fee_snapshot_survives_a_retry() -> anyhow::Result<()> {
    let fx = fixture(common::stripe_fees()).await?;
    fx.provider.fail_next_intents(1);

    let transaction = fx
        .transactions
        .create(common::pending_intent_transaction(Uuid::new_v4(), 100.0))
        .await?;
    let job_id = enqueue_intent_job(&fx, transaction.id, 3).await?;

    assert!(fx.workers.tick().await?);
    let snapshot = fx
        .transactions
        .find_by_id(transaction.id)
        .await?
        .expect("transaction exists");
    // The snapshot was written before the failed provider call.
    assert_eq!(snapshot.processing_fee, Some(3.30));

    make_due(&fx, job_id).await?;
    assert!(fx.workers.tick().await?);

    let settled = fx
        .transactions
        .find_by_id(transaction.id)
        .await?
        .expect("transaction exists");
    assert_eq!(settled.status, TransactionStatus::Pending);
    assert_eq!(settled.processing_fee, Some(3.30));

    Ok(())
}

#[tokio::test]
async fn disabled_fees_charge_the_base_amount() -> anyhow::Result<()> {
    let fx = fixture(FeePolicy::disabled()).await?;

    let transaction = fx
        .transactions
        .create(common::pending_intent_transaction(Uuid::new_v4(), 100.0))
        .await?;
    enqueue_intent_job(&fx, transaction.id, 5).await?;

    assert!(fx.workers.tick().await?);

    let calls = fx.provider.intent_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].amount_minor_units, 10_000);

    let updated = fx
        .transactions
        .find_by_id(transaction.id)
        .await?
        .expect("transaction exists");
    assert_eq!(updated.processing_fee, Some(0.0));

    Ok(())
}
