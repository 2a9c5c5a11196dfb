use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Refund, RefundStatus},
    error::{AppError, Result},
    repository::RefundRepository,
};

#[derive(FromRow)]
struct RefundRow {
    id: String,
    transaction_id: String,
    amount: f64,
    reason: String,
    status: String,
    provider_refund_id: Option<String>,
    error_message: Option<String>,
    processed_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

const COLUMNS: &str = "id, transaction_id, amount, reason, status, provider_refund_id, \
                       error_message, processed_at, created_at, updated_at";

pub struct SqliteRefundRepository {
    pool: SqlitePool,
}

impl SqliteRefundRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_refund(row: RefundRow) -> Result<Refund> {
        Ok(Refund {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            transaction_id: Uuid::parse_str(&row.transaction_id)
                .map_err(|e| AppError::Database(e.to_string()))?,
            amount: row.amount,
            reason: row.reason,
            status: RefundStatus::parse(&row.status)
                .ok_or_else(|| AppError::Database(format!("Invalid refund status: {}", row.status)))?,
            provider_refund_id: row.provider_refund_id,
            error_message: row.error_message,
            processed_at: row
                .processed_at
                .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }
}

#[async_trait]
impl RefundRepository for SqliteRefundRepository {
    async fn create(&self, refund: Refund) -> Result<Refund> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO refunds (
                id, transaction_id, amount, reason, status, provider_refund_id,
                error_message, processed_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(refund.id.to_string())
        .bind(refund.transaction_id.to_string())
        .bind(refund.amount)
        .bind(&refund.reason)
        .bind(refund.status.as_str())
        .bind(&refund.provider_refund_id)
        .bind(&refund.error_message)
        .bind(refund.processed_at.map(|dt| dt.naive_utc()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(refund.id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created refund".to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Refund>> {
        let sql = format!("SELECT {} FROM refunds WHERE id = ?", COLUMNS);
        let row = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_refund(r)?)),
            None => Ok(None),
        }
    }

    async fn find_pending_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<Refund>> {
        let sql = format!(
            "SELECT {} FROM refunds WHERE transaction_id = ? AND status = 'pending' ORDER BY created_at ASC, id ASC",
            COLUMNS
        );
        let rows = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(transaction_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_refund).collect()
    }

    async fn mark_succeeded(&self, id: Uuid, provider_refund_id: &str) -> Result<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            UPDATE refunds
            SET status = 'succeeded',
                provider_refund_id = ?,
                error_message = NULL,
                processed_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(provider_refund_id)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            "UPDATE refunds SET status = 'failed', error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(message)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
