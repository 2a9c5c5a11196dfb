use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of the payment ledger. A transaction is created in
/// `PendingIntent`, picked up by the create-intent worker, and settled by
/// webhook deliveries. Fee fields are a snapshot of the policy applied at
/// intent-creation time and are never recomputed afterwards; a new attempt
/// gets a new row instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Base amount the recipient should receive, in decimal currency units.
    pub amount: f64,
    pub currency: String,
    pub status: TransactionStatus,
    pub description: String,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub provider_client_secret: Option<String>,
    pub processing_fee: Option<f64>,
    pub fee_percent: Option<f64>,
    pub fee_flat_cents: Option<i64>,
    pub fee_refundable: Option<bool>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn amount_minor_units(&self) -> i64 {
        to_minor_units(self.amount)
    }
}

/// Two-decimal currencies only; zero-decimal currencies are out of scope.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

pub fn from_minor_units(minor: i64) -> f64 {
    minor as f64 / 100.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    PendingIntent,
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::PendingIntent => "pending_intent",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_intent" => Some(TransactionStatus::PendingIntent),
            "pending" => Some(TransactionStatus::Pending),
            "succeeded" => Some(TransactionStatus::Succeeded),
            "failed" => Some(TransactionStatus::Failed),
            "canceled" => Some(TransactionStatus::Canceled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransactionRequest {
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: Option<String>,
    pub description: String,
}
