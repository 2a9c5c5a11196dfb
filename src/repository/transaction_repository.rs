use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Transaction, TransactionStatus},
    error::{AppError, Result},
    repository::TransactionRepository,
};

#[derive(FromRow)]
struct TransactionRow {
    id: String,
    user_id: String,
    amount: f64,
    currency: String,
    status: String,
    description: String,
    provider: String,
    provider_payment_id: Option<String>,
    provider_client_secret: Option<String>,
    processing_fee: Option<f64>,
    fee_percent: Option<f64>,
    fee_flat_cents: Option<i64>,
    fee_refundable: Option<bool>,
    error_message: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

const COLUMNS: &str = "id, user_id, amount, currency, status, description, provider, \
                       provider_payment_id, provider_client_secret, processing_fee, \
                       fee_percent, fee_flat_cents, fee_refundable, error_message, \
                       created_at, updated_at";

pub struct SqliteTransactionRepository {
    pool: SqlitePool,
}

impl SqliteTransactionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_transaction(row: TransactionRow) -> Result<Transaction> {
        Ok(Transaction {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            user_id: Uuid::parse_str(&row.user_id)
                .map_err(|e| AppError::Database(e.to_string()))?,
            amount: row.amount,
            currency: row.currency,
            status: TransactionStatus::parse(&row.status).ok_or_else(|| {
                AppError::Database(format!("Invalid transaction status: {}", row.status))
            })?,
            description: row.description,
            provider: row.provider,
            provider_payment_id: row.provider_payment_id,
            provider_client_secret: row.provider_client_secret,
            processing_fee: row.processing_fee,
            fee_percent: row.fee_percent,
            fee_flat_cents: row.fee_flat_cents,
            fee_refundable: row.fee_refundable,
            error_message: row.error_message,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }
}

#[async_trait]
impl TransactionRepository for SqliteTransactionRepository {
    async fn create(&self, transaction: Transaction) -> Result<Transaction> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, user_id, amount, currency, status, description, provider,
                provider_payment_id, provider_client_secret, processing_fee,
                fee_percent, fee_flat_cents, fee_refundable, error_message,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.id.to_string())
        .bind(transaction.user_id.to_string())
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.status.as_str())
        .bind(&transaction.description)
        .bind(&transaction.provider)
        .bind(&transaction.provider_payment_id)
        .bind(&transaction.provider_client_secret)
        .bind(transaction.processing_fee)
        .bind(transaction.fee_percent)
        .bind(transaction.fee_flat_cents)
        .bind(transaction.fee_refundable)
        .bind(&transaction.error_message)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(transaction.id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created transaction".to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>> {
        let sql = format!("SELECT {} FROM transactions WHERE id = ?", COLUMNS);
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_transaction(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_provider_payment_id(
        &self,
        provider_payment_id: &str,
    ) -> Result<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE provider_payment_id = ?",
            COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(provider_payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_transaction(r)?)),
            None => Ok(None),
        }
    }

    async fn find_latest_for_user(&self, user_id: Uuid) -> Result<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
            COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_transaction(r)?)),
            None => Ok(None),
        }
    }

    async fn record_fee_snapshot(
        &self,
        id: Uuid,
        processing_fee: f64,
        fee_percent: f64,
        fee_flat_cents: i64,
        fee_refundable: bool,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();

        // COALESCE keeps any previously written snapshot: retried attempts
        // must not rewrite fee history.
        sqlx::query(
            r#"
            UPDATE transactions
            SET processing_fee = COALESCE(processing_fee, ?),
                fee_percent = COALESCE(fee_percent, ?),
                fee_flat_cents = COALESCE(fee_flat_cents, ?),
                fee_refundable = COALESCE(fee_refundable, ?),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(processing_fee)
        .bind(fee_percent)
        .bind(fee_flat_cents)
        .bind(fee_refundable)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn mark_intent_created(
        &self,
        id: Uuid,
        provider_payment_id: &str,
        provider_client_secret: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'pending',
                provider_payment_id = ?,
                provider_client_secret = ?,
                error_message = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(provider_payment_id)
        .bind(provider_client_secret)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn record_error(&self, id: Uuid, message: &str) -> Result<()> {
        let now = Utc::now().naive_utc();

        sqlx::query("UPDATE transactions SET error_message = ?, updated_at = ? WHERE id = ?")
            .bind(message)
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
            "UPDATE transactions SET status = 'failed', error_message = ?, updated_at = ? WHERE id = ?",
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
