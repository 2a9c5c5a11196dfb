mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::json;
use tower::util::ServiceExt;
use uuid::Uuid;

use remit::api::{create_app, state::AppState};
use remit::domain::{CreateTransactionRequest, RefundStatus, TransactionStatus};
use remit::payments::FakeProvider;
use remit::queue::{JobQueue, WorkerPool, QUEUE_NOTIFICATIONS, QUEUE_PAYMENTS};
use remit::repository::{
    RefundRepository, SqliteRefundRepository, SqliteTransactionRepository, TransactionRepository,
};
use remit::service::PaymentService;
use remit::webhooks::{signature, WebhookProcessor};
use remit::workers::{CreateIntentWorker, RefundWorker};

const SECRET: &str = "whsec_e2e";

fn signed_post(body: String) -> Request<Body> {
    let header_value = signature::sign(SECRET, body.as_bytes(), Utc::now().timestamp());
    Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("Stripe-Signature", header_value)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// The whole asynchronous flow against one in-memory store: enqueue,
/// create the intent with a grossed-up charge, settle over a webhook,
/// refund, settle the refund.
#[tokio::test]
async fn payment_lifecycle_end_to_end() -> anyhow::Result<()> {
    let pool = common::setup_pool().await?;
    let transactions = Arc::new(SqliteTransactionRepository::new(pool.clone()));
    let refunds = Arc::new(SqliteRefundRepository::new(pool.clone()));
    let provider = Arc::new(FakeProvider::new());
    let queue = Arc::new(JobQueue::new(pool.clone()));

    let service = PaymentService::new(
        transactions.clone(),
        refunds.clone(),
        queue.clone(),
        "stripe".to_string(),
        "usd".to_string(),
        5,
    );

    let mut workers = WorkerPool::new(
        queue.clone(),
        &[QUEUE_PAYMENTS],
        1,
        Duration::from_millis(10),
    );
    workers.register(Arc::new(CreateIntentWorker::new(
        transactions.clone(),
        provider.clone(),
        common::stripe_fees(),
    )));
    workers.register(Arc::new(RefundWorker::new(
        transactions.clone(),
        refunds.clone(),
        provider.clone(),
        queue.clone(),
    )));

    let app: Router = create_app(
        AppState::new(
            Arc::new(WebhookProcessor::new(pool.clone(), SECRET.to_string())),
            "stripe".to_string(),
        ),
        Duration::from_secs(5),
    );

    // A $100.00 payment is requested; the ledger row and its job appear
    // together.
    let transaction = service
        .create_payment(CreateTransactionRequest {
            user_id: Uuid::new_v4(),
            amount: 100.0,
            currency: None,
            description: "Annual dues".to_string(),
        })
        .await?;
    assert_eq!(transaction.status, TransactionStatus::PendingIntent);

    // The worker turns it into a provider intent, charging base + fee.
    assert_eq!(workers.drain().await?, 1);

    let pending = transactions
        .find_by_id(transaction.id)
        .await?
        .expect("transaction exists");
    assert_eq!(pending.status, TransactionStatus::Pending);
    assert_eq!(pending.processing_fee, Some(3.30));
    assert_eq!(pending.provider_payment_id.as_deref(), Some("pi_fake_1"));
    assert_eq!(provider.intent_calls()[0].amount_minor_units, 10_330);

    // The provider confirms asynchronously.
    let confirm = json!({
        "id": "evt_success",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_fake_1", "object": "payment_intent" } }
    })
    .to_string();
    let response = app.clone().oneshot(signed_post(confirm)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let succeeded = transactions
        .find_by_id(transaction.id)
        .await?
        .expect("transaction exists");
    assert_eq!(succeeded.status, TransactionStatus::Succeeded);

    // The user asks for their money back.
    let refund = service
        .request_refund(transaction.id, None, "event canceled".to_string())
        .await?;
    assert_eq!(workers.drain().await?, 1);

    let settled = refunds.find_by_id(refund.id).await?.expect("refund exists");
    assert_eq!(settled.status, RefundStatus::Succeeded);
    assert_eq!(settled.provider_refund_id.as_deref(), Some("re_fake_1"));
    assert_eq!(queue.list_queue(QUEUE_NOTIFICATIONS).await?.len(), 1);

    // The provider's own refund confirmation arrives afterwards; with the
    // refund already settled it is a clean no-op.
    let refunded = json!({
        "id": "evt_refund",
        "type": "charge.refunded",
        "data": { "object": { "id": "ch_1", "object": "charge", "payment_intent": "pi_fake_1" } }
    })
    .to_string();
    let response = app.clone().oneshot(signed_post(refunded)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let still_settled = refunds.find_by_id(refund.id).await?.expect("refund exists");
    assert_eq!(still_settled.status, RefundStatus::Succeeded);

    Ok(())
}
