#![allow(dead_code)]

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use remit::domain::{Refund, RefundStatus, Transaction, TransactionStatus};
use remit::payments::FeePolicy;

/// In-memory database with the full schema applied. Capped at one
/// connection so every query sees the same memory database.
pub async fn setup_pool() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// The standard card fee schedule used throughout the tests.
pub fn stripe_fees() -> FeePolicy {
    FeePolicy {
        enabled: true,
        percent: 2.9,
        flat_cents: 30,
        refundable: false,
    }
}

pub fn pending_intent_transaction(user_id: Uuid, amount: f64) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: Uuid::new_v4(),
        user_id,
        amount,
        currency: "usd".to_string(),
        status: TransactionStatus::PendingIntent,
        description: "Test payment".to_string(),
        provider: "stripe".to_string(),
        provider_payment_id: None,
        provider_client_secret: None,
        processing_fee: None,
        fee_percent: None,
        fee_flat_cents: None,
        fee_refundable: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn succeeded_transaction(user_id: Uuid, amount: f64, provider_payment_id: &str) -> Transaction {
    let mut transaction = pending_intent_transaction(user_id, amount);
    transaction.status = TransactionStatus::Succeeded;
    transaction.provider_payment_id = Some(provider_payment_id.to_string());
    transaction.provider_client_secret = Some(format!("{}_secret", provider_payment_id));
    transaction
}

pub fn pending_refund(transaction_id: Uuid, amount: f64) -> Refund {
    let now = Utc::now();
    Refund {
        id: Uuid::new_v4(),
        transaction_id,
        amount,
        reason: "requested_by_customer".to_string(),
        status: RefundStatus::Pending,
        provider_refund_id: None,
        error_message: None,
        processed_at: None,
        created_at: now,
        updated_at: now,
    }
}
