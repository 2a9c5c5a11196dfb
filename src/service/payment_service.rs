use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    domain::{CreateTransactionRequest, Refund, RefundStatus, Transaction, TransactionStatus},
    error::{AppError, Result},
    queue::{JobQueue, NewJob, QUEUE_PAYMENTS},
    repository::{RefundRepository, TransactionRepository},
    workers::{KIND_CREATE_INTENT, KIND_PROCESS_REFUND},
};

/// What to do with a new payment request given the user's most recent
/// transaction. Returned as an explicit decision so each outcome is
/// independently testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentDecision {
    /// An intent is already in flight; hand the caller the existing row.
    Reuse,
    /// The payment already succeeded; reject instead of charging twice.
    Duplicate,
    /// No usable prior attempt (none, failed, or canceled): start fresh.
    CreateNew,
}

pub fn decide_intent(existing: Option<&Transaction>) -> IntentDecision {
    match existing {
        Some(tx)
            if matches!(
                tx.status,
                TransactionStatus::PendingIntent | TransactionStatus::Pending
            ) =>
        {
            IntentDecision::Reuse
        }
        Some(tx) if tx.status == TransactionStatus::Succeeded => IntentDecision::Duplicate,
        _ => IntentDecision::CreateNew,
    }
}

/// The initiating side of the payment flow: inserts ledger rows and owns
/// the "on transaction created, enqueue the job" contract (an explicit
/// call, not a database trigger, so the job-creation path stays visible
/// and testable).
pub struct PaymentService {
    transactions: Arc<dyn TransactionRepository>,
    refunds: Arc<dyn RefundRepository>,
    queue: Arc<JobQueue>,
    provider_name: String,
    default_currency: String,
    max_attempts: i64,
}

impl PaymentService {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        refunds: Arc<dyn RefundRepository>,
        queue: Arc<JobQueue>,
        provider_name: String,
        default_currency: String,
        max_attempts: i64,
    ) -> Self {
        Self {
            transactions,
            refunds,
            queue,
            provider_name,
            default_currency,
            max_attempts,
        }
    }

    pub async fn create_payment(&self, request: CreateTransactionRequest) -> Result<Transaction> {
        if request.amount <= 0.0 {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }

        let existing = self.transactions.find_latest_for_user(request.user_id).await?;
        let decision = decide_intent(existing.as_ref());
        if let Some(prior) = existing {
            match decision {
                IntentDecision::Reuse => {
                    tracing::info!(
                        transaction_id = %prior.id,
                        "payment intent already in flight, reusing"
                    );
                    return Ok(prior);
                }
                IntentDecision::Duplicate => {
                    return Err(AppError::Conflict(
                        "payment already completed for this user".to_string(),
                    ));
                }
                IntentDecision::CreateNew => {}
            }
        }

        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            amount: request.amount,
            currency: request
                .currency
                .unwrap_or_else(|| self.default_currency.clone())
                .to_lowercase(),
            status: TransactionStatus::PendingIntent,
            description: request.description,
            provider: self.provider_name.clone(),
            provider_payment_id: None,
            provider_client_secret: None,
            processing_fee: None,
            fee_percent: None,
            fee_flat_cents: None,
            fee_refundable: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        let transaction = self.transactions.create(transaction).await?;

        self.queue
            .enqueue(
                NewJob::new(
                    KIND_CREATE_INTENT,
                    json!({ "transaction_id": transaction.id }),
                )
                .on_queue(QUEUE_PAYMENTS)
                .with_max_attempts(self.max_attempts),
            )
            .await?;

        Ok(transaction)
    }

    pub async fn request_refund(
        &self,
        transaction_id: Uuid,
        amount: Option<f64>,
        reason: String,
    ) -> Result<Refund> {
        let transaction = self
            .transactions
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound("transaction not found".to_string()))?;

        if transaction.status != TransactionStatus::Succeeded {
            return Err(AppError::Conflict(
                "only succeeded payments can be refunded".to_string(),
            ));
        }

        let amount = amount.unwrap_or(transaction.amount);
        if amount <= 0.0 || amount > transaction.amount {
            return Err(AppError::Validation(
                "refund amount must be positive and at most the original amount".to_string(),
            ));
        }

        // One pending refund per transaction; this check is the enforcement
        // point for that invariant.
        if !self
            .refunds
            .find_pending_for_transaction(transaction.id)
            .await?
            .is_empty()
        {
            return Err(AppError::Conflict(
                "a refund is already pending for this transaction".to_string(),
            ));
        }

        let now = Utc::now();
        let refund = Refund {
            id: Uuid::new_v4(),
            transaction_id: transaction.id,
            amount,
            reason,
            status: RefundStatus::Pending,
            provider_refund_id: None,
            error_message: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        };
        let refund = self.refunds.create(refund).await?;

        self.queue
            .enqueue(
                NewJob::new(KIND_PROCESS_REFUND, json!({ "refund_id": refund.id }))
                    .on_queue(QUEUE_PAYMENTS)
                    .with_max_attempts(self.max_attempts),
            )
            .await?;

        Ok(refund)
    }
}
