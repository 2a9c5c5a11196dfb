use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::{
    domain::{RefundStatus, TransactionStatus},
    error::AppError,
    payments::ProviderClient,
    queue::{Job, JobError, JobHandler, JobQueue, NewJob, QUEUE_NOTIFICATIONS},
    repository::{RefundRepository, TransactionRepository},
};

use super::{RefundArgs, KIND_PROCESS_REFUND, KIND_REFUND_NOTIFY};

/// Consumes `payment.refund` jobs. Provider-side refund rejections (already
/// refunded, insufficient balance) are permanent: the refund row is marked
/// failed and an operator re-initiates, the queue never retries.
pub struct RefundWorker {
    transactions: Arc<dyn TransactionRepository>,
    refunds: Arc<dyn RefundRepository>,
    provider: Arc<dyn ProviderClient>,
    queue: Arc<JobQueue>,
}

impl RefundWorker {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        refunds: Arc<dyn RefundRepository>,
        provider: Arc<dyn ProviderClient>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            transactions,
            refunds,
            provider,
            queue,
        }
    }
}

#[async_trait]
impl JobHandler for RefundWorker {
    fn kind(&self) -> &str {
        KIND_PROCESS_REFUND
    }

    async fn handle(&self, job: &Job) -> std::result::Result<(), JobError> {
        let args: RefundArgs = serde_json::from_value(job.args.clone())
            .map_err(|e| JobError::Fatal(AppError::BadRequest(format!("invalid job args: {}", e))))?;

        let Some(refund) = self.refunds.find_by_id(args.refund_id).await? else {
            return Err(JobError::Fatal(AppError::NotFound(format!(
                "refund {} does not exist",
                args.refund_id
            ))));
        };

        // Redelivered job for an already-settled refund.
        if refund.status != RefundStatus::Pending {
            tracing::info!(
                refund_id = %refund.id,
                status = refund.status.as_str(),
                "refund already handled, skipping"
            );
            return Ok(());
        }

        let Some(transaction) = self.transactions.find_by_id(refund.transaction_id).await? else {
            let message = format!("owning transaction {} does not exist", refund.transaction_id);
            self.refunds.mark_failed(refund.id, &message).await?;
            return Err(JobError::Fatal(AppError::NotFound(message)));
        };

        // The initiating operation checks this before inserting the row;
        // re-check here because jobs outlive their enqueue-time view.
        if transaction.status != TransactionStatus::Succeeded {
            let message = format!(
                "transaction {} is {}, only succeeded payments can be refunded",
                transaction.id,
                transaction.status.as_str()
            );
            self.refunds.mark_failed(refund.id, &message).await?;
            return Err(JobError::Fatal(AppError::Conflict(message)));
        }

        let Some(provider_payment_id) = transaction.provider_payment_id.as_deref() else {
            let message = format!("transaction {} has no provider payment id", transaction.id);
            self.refunds.mark_failed(refund.id, &message).await?;
            return Err(JobError::Fatal(AppError::Conflict(message)));
        };

        match self
            .provider
            .create_refund(provider_payment_id, refund.amount_minor_units(), &refund.reason)
            .await
        {
            Ok(outcome) => {
                self.refunds
                    .mark_succeeded(refund.id, &outcome.provider_refund_id)
                    .await?;
                tracing::info!(
                    refund_id = %refund.id,
                    provider_refund_id = %outcome.provider_refund_id,
                    provider_status = ?outcome.status,
                    "refund processed"
                );

                // Best effort: a lost notification is an annoyance, a
                // failed refund is not.
                let notify = NewJob::new(
                    KIND_REFUND_NOTIFY,
                    json!({
                        "refund_id": refund.id,
                        "transaction_id": transaction.id,
                        "user_id": transaction.user_id,
                        "amount": refund.amount,
                    }),
                )
                .on_queue(QUEUE_NOTIFICATIONS);
                if let Err(e) = self.queue.enqueue(notify).await {
                    tracing::warn!(
                        refund_id = %refund.id,
                        "refund settled but notification enqueue failed: {}",
                        e
                    );
                }

                Ok(())
            }
            Err(e) => {
                self.refunds.mark_failed(refund.id, &e.to_string()).await?;
                Err(JobError::Fatal(e))
            }
        }
    }
}
