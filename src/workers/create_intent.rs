use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{from_minor_units, TransactionStatus},
    error::AppError,
    payments::{FeePolicy, ProviderClient},
    queue::{Job, JobError, JobHandler},
    repository::TransactionRepository,
};

use super::{CreateIntentArgs, KIND_CREATE_INTENT};

/// Consumes `payment.create_intent` jobs: computes the fee, asks the
/// provider for a payment intent over the grossed-up total, and writes the
/// provider identifiers back onto the ledger row.
pub struct CreateIntentWorker {
    transactions: Arc<dyn TransactionRepository>,
    provider: Arc<dyn ProviderClient>,
    fee_policy: FeePolicy,
}

impl CreateIntentWorker {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        provider: Arc<dyn ProviderClient>,
        fee_policy: FeePolicy,
    ) -> Self {
        Self {
            transactions,
            provider,
            fee_policy,
        }
    }
}

#[async_trait]
impl JobHandler for CreateIntentWorker {
    fn kind(&self) -> &str {
        KIND_CREATE_INTENT
    }

    async fn handle(&self, job: &Job) -> std::result::Result<(), JobError> {
        let args: CreateIntentArgs = serde_json::from_value(job.args.clone())
            .map_err(|e| JobError::Fatal(AppError::BadRequest(format!("invalid job args: {}", e))))?;

        let Some(transaction) = self.transactions.find_by_id(args.transaction_id).await? else {
            // A job pointing at a missing row is a data-integrity problem,
            // not a transient one.
            return Err(JobError::Fatal(AppError::NotFound(format!(
                "transaction {} does not exist",
                args.transaction_id
            ))));
        };

        // Redelivered or duplicate job: some earlier execution already got
        // past intent creation. Nothing to do, and no provider call.
        if transaction.status != TransactionStatus::PendingIntent {
            tracing::info!(
                transaction_id = %transaction.id,
                status = transaction.status.as_str(),
                "payment intent already handled, skipping"
            );
            return Ok(());
        }

        let base = transaction.amount_minor_units();
        let fee = self.fee_policy.calculate(base);
        let total = base + fee;

        // Snapshot the fee before calling out, so the audit trail exists
        // even if the provider call fails or the process dies right after.
        self.transactions
            .record_fee_snapshot(
                transaction.id,
                from_minor_units(fee),
                self.fee_policy.percent,
                self.fee_policy.flat_cents,
                self.fee_policy.refundable,
            )
            .await?;

        // The payer covers the fee: charge base + fee, not base.
        match self
            .provider
            .create_intent(total, &transaction.currency, &transaction.description)
            .await
        {
            Ok(outcome) => {
                self.transactions
                    .mark_intent_created(
                        transaction.id,
                        &outcome.provider_payment_id,
                        outcome.client_secret.as_deref(),
                    )
                    .await?;
                tracing::info!(
                    transaction_id = %transaction.id,
                    provider_payment_id = %outcome.provider_payment_id,
                    provider_status = ?outcome.status,
                    amount_minor_units = total,
                    fee_minor_units = fee,
                    "payment intent created"
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let permanent =
                    matches!(e, AppError::Validation(_) | AppError::BadRequest(_));

                if permanent {
                    self.transactions.mark_failed(transaction.id, &message).await?;
                    return Err(JobError::Fatal(e));
                }

                if job.on_final_attempt() {
                    // Out of retries: the failure becomes the row's terminal
                    // state.
                    self.transactions.mark_failed(transaction.id, &message).await?;
                } else {
                    // Keep pending_intent so the rescheduled job is not
                    // short-circuited by the idempotency check above.
                    self.transactions.record_error(transaction.id, &message).await?;
                }
                Err(JobError::Retryable(e))
            }
        }
    }
}
