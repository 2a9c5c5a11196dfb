use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod create_intent;
pub mod refund;

pub use create_intent::CreateIntentWorker;
pub use refund::RefundWorker;

pub const KIND_CREATE_INTENT: &str = "payment.create_intent";
pub const KIND_PROCESS_REFUND: &str = "payment.refund";
pub const KIND_REFUND_NOTIFY: &str = "refund.notify";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateIntentArgs {
    pub transaction_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundArgs {
    pub refund_id: Uuid,
}
