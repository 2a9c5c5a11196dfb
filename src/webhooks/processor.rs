use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{TransactionStatus, WebhookEvent},
    error::{AppError, Result},
};

use super::signature;

/// How a verified delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAck {
    Processed,
    /// The (provider, provider_event_id) pair was already recorded; the
    /// delivery is acknowledged so the provider stops retrying, and no
    /// state transition runs again.
    Duplicate,
}

impl WebhookAck {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookAck::Processed => "processed",
            WebhookAck::Duplicate => "duplicate",
        }
    }
}

/// Applies provider notifications to the ledger, one database transaction
/// per delivery. Signature failures leave no durable trace; processing
/// failures after verification are stored on the event row and surface as
/// a server error so the provider redelivers.
pub struct WebhookProcessor {
    pool: SqlitePool,
    webhook_secret: String,
}

impl WebhookProcessor {
    pub fn new(pool: SqlitePool, webhook_secret: String) -> Self {
        Self {
            pool,
            webhook_secret,
        }
    }

    pub async fn process(
        &self,
        provider: &str,
        signature_header: &str,
        body: &[u8],
    ) -> Result<WebhookAck> {
        signature::verify(
            &self.webhook_secret,
            signature_header,
            body,
            Utc::now().timestamp(),
        )?;

        let payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?;
        let event_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::BadRequest("event id missing".to_string()))?
            .to_string();
        let event_type = payload
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if !insert_event(&mut tx, provider, &event_id, &event_type, &payload).await? {
            tx.commit()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            tracing::info!(provider, event_id = %event_id, "duplicate webhook event, skipping");
            return Ok(WebhookAck::Duplicate);
        }

        match apply_event(&mut tx, &event_type, &payload).await {
            Ok(()) => {
                mark_processed(&mut tx, provider, &event_id).await?;
                tx.commit()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                tracing::info!(provider, event_id = %event_id, event_type = %event_type, "webhook event processed");
                Ok(WebhookAck::Processed)
            }
            Err(e) => {
                // Roll back the partial transition, but keep a durable
                // record of the event and what went wrong; the provider's
                // retry loop will redeliver.
                tx.rollback()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                self.record_failure(provider, &event_id, &event_type, &payload, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Load the stored event for an idempotency key; used to inspect what
    /// a delivery recorded.
    pub async fn find_event(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<Option<WebhookEvent>> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, provider, provider_event_id, event_type, payload,
                   signature_verified, processed, processed_at, error_message, created_at
            FROM webhook_events
            WHERE provider = ? AND provider_event_id = ?
            "#,
        )
        .bind(provider)
        .bind(provider_event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(row_to_event).transpose()
    }

    async fn record_failure(
        &self,
        provider: &str,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        message: &str,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO webhook_events (
                id, provider, provider_event_id, event_type, payload,
                signature_verified, processed, error_message, created_at
            ) VALUES (?, ?, ?, ?, ?, 1, 0, ?, ?)
            ON CONFLICT(provider, provider_event_id) DO UPDATE SET
                error_message = excluded.error_message
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(provider)
        .bind(event_id)
        .bind(event_type)
        .bind(payload.to_string())
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}

#[derive(FromRow)]
struct EventRow {
    id: String,
    provider: String,
    provider_event_id: String,
    event_type: String,
    payload: String,
    signature_verified: bool,
    processed: bool,
    processed_at: Option<NaiveDateTime>,
    error_message: Option<String>,
    created_at: NaiveDateTime,
}

fn row_to_event(row: EventRow) -> Result<WebhookEvent> {
    Ok(WebhookEvent {
        id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
        provider: row.provider,
        provider_event_id: row.provider_event_id,
        event_type: row.event_type,
        payload: serde_json::from_str(&row.payload)
            .map_err(|e| AppError::Database(e.to_string()))?,
        signature_verified: row.signature_verified,
        processed: row.processed,
        processed_at: row
            .processed_at
            .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
        error_message: row.error_message,
        created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
    })
}

/// Insert the event row; returns false when the idempotency key already
/// exists.
async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    provider: &str,
    event_id: &str,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<bool> {
    let now = Utc::now().naive_utc();

    let result = sqlx::query(
        r#"
        INSERT INTO webhook_events (
            id, provider, provider_event_id, event_type, payload,
            signature_verified, processed, created_at
        ) VALUES (?, ?, ?, ?, ?, 1, 0, ?)
        ON CONFLICT(provider, provider_event_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(provider)
    .bind(event_id)
    .bind(event_type)
    .bind(payload.to_string())
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() > 0)
}

async fn mark_processed(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    provider: &str,
    event_id: &str,
) -> Result<()> {
    let now = Utc::now().naive_utc();

    sqlx::query(
        r#"
        UPDATE webhook_events
        SET processed = 1, processed_at = ?, error_message = NULL
        WHERE provider = ? AND provider_event_id = ?
        "#,
    )
    .bind(now)
    .bind(provider)
    .bind(event_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(())
}

async fn apply_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    match event_type {
        "payment_intent.succeeded" => {
            transition_intent(tx, payload, TransactionStatus::Succeeded).await
        }
        "payment_intent.payment_failed" => {
            transition_intent(tx, payload, TransactionStatus::Failed).await
        }
        "payment_intent.canceled" => {
            transition_intent(tx, payload, TransactionStatus::Canceled).await
        }
        "charge.refunded" => settle_refund(tx, payload).await,
        other => {
            // New provider event types must not break the receiver; they
            // are stored and marked processed with no state change.
            tracing::debug!(event_type = other, "unhandled webhook event type");
            Ok(())
        }
    }
}

async fn transition_intent(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    payload: &serde_json::Value,
    status: TransactionStatus,
) -> Result<()> {
    let provider_payment_id = object_field(payload, "id")
        .ok_or_else(|| AppError::BadRequest("payment intent id missing".to_string()))?;

    let Some(transaction_id) = find_transaction_id(&mut **tx, &provider_payment_id).await? else {
        // An intent from an abandoned attempt can confirm after its row is
        // gone; acknowledging it keeps the provider from retrying forever.
        tracing::info!(
            provider_payment_id = %provider_payment_id,
            "no transaction for payment intent, ignoring orphaned event"
        );
        return Ok(());
    };

    // Success clears the last error; failure records the provider's
    // detail; cancellation keeps whatever was there.
    let error_message = match status {
        TransactionStatus::Failed => Some(
            payload
                .pointer("/data/object/last_payment_error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("payment failed")
                .to_string(),
        ),
        _ => None,
    };
    let overwrite_error = !matches!(status, TransactionStatus::Canceled);

    let now = Utc::now().naive_utc();
    sqlx::query(
        r#"
        UPDATE transactions
        SET status = ?,
            error_message = CASE WHEN ? THEN ? ELSE error_message END,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(overwrite_error)
    .bind(&error_message)
    .bind(now)
    .bind(&transaction_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    tracing::info!(
        transaction_id = %transaction_id,
        provider_payment_id = %provider_payment_id,
        status = status.as_str(),
        "transaction settled by webhook"
    );
    Ok(())
}

async fn settle_refund(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    payload: &serde_json::Value,
) -> Result<()> {
    // For charge events the owning intent is a field, not the object id.
    let Some(provider_payment_id) = object_field(payload, "payment_intent") else {
        tracing::info!("charge.refunded without payment_intent, ignoring");
        return Ok(());
    };

    let Some(transaction_id) = find_transaction_id(&mut **tx, &provider_payment_id).await? else {
        tracing::info!(
            provider_payment_id = %provider_payment_id,
            "no transaction for refunded charge, ignoring orphaned event"
        );
        return Ok(());
    };

    let pending_ids: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM refunds WHERE transaction_id = ? AND status = 'pending' ORDER BY created_at ASC, id ASC",
    )
    .bind(&transaction_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    let Some(refund_id) = pending_ids.first() else {
        // The refund worker usually settles the row before this event
        // lands; nothing left to do.
        tracing::info!(transaction_id = %transaction_id, "no pending refund to settle");
        return Ok(());
    };

    if pending_ids.len() > 1 {
        // The initiating operation allows one pending refund per
        // transaction; seeing several means that invariant was violated
        // upstream. Do not reconcile silently.
        tracing::error!(
            transaction_id = %transaction_id,
            pending = pending_ids.len(),
            "multiple pending refunds for one transaction, settling the oldest"
        );
    }

    let now = Utc::now().naive_utc();
    sqlx::query(
        r#"
        UPDATE refunds
        SET status = 'succeeded', processed_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(refund_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    tracing::info!(
        transaction_id = %transaction_id,
        refund_id = %refund_id,
        "refund settled by webhook"
    );
    Ok(())
}

fn object_field(payload: &serde_json::Value, field: &str) -> Option<String> {
    payload
        .pointer(&format!("/data/object/{}", field))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

async fn find_transaction_id(
    conn: &mut SqliteConnection,
    provider_payment_id: &str,
) -> Result<Option<String>> {
    sqlx::query_scalar("SELECT id FROM transactions WHERE provider_payment_id = ?")
        .bind(provider_payment_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}
