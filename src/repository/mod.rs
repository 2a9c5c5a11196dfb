use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::*;
use crate::error::Result;

pub mod refund_repository;
pub mod transaction_repository;

pub use refund_repository::SqliteRefundRepository;
pub use transaction_repository::SqliteTransactionRepository;

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn create(&self, transaction: Transaction) -> Result<Transaction>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>>;
    async fn find_by_provider_payment_id(
        &self,
        provider_payment_id: &str,
    ) -> Result<Option<Transaction>>;
    async fn find_latest_for_user(&self, user_id: Uuid) -> Result<Option<Transaction>>;
    /// Write the fee snapshot once. Columns already holding a value are
    /// left untouched; the snapshot is immutable after the first write.
    async fn record_fee_snapshot(
        &self,
        id: Uuid,
        processing_fee: f64,
        fee_percent: f64,
        fee_flat_cents: i64,
        fee_refundable: bool,
    ) -> Result<()>;
    /// Set the provider identifiers, move to `Pending`, clear any error.
    async fn mark_intent_created(
        &self,
        id: Uuid,
        provider_payment_id: &str,
        provider_client_secret: Option<&str>,
    ) -> Result<()>;
    async fn record_error(&self, id: Uuid, message: &str) -> Result<()>;
    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<()>;
}

#[async_trait]
pub trait RefundRepository: Send + Sync {
    async fn create(&self, refund: Refund) -> Result<Refund>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Refund>>;
    async fn find_pending_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<Refund>>;
    async fn mark_succeeded(&self, id: Uuid, provider_refund_id: &str) -> Result<()>;
    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<()>;
}
