pub mod payment_service;

pub use payment_service::{decide_intent, IntentDecision, PaymentService};
