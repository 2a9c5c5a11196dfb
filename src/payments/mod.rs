use async_trait::async_trait;

use crate::error::Result;

pub mod fees;
pub mod stripe_provider;

pub use fees::FeePolicy;
pub use stripe_provider::StripeProvider;

/// Provider-side view of a payment intent after creation. Most providers
/// answer `Pending` here; settlement arrives later over webhooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderPaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct IntentOutcome {
    pub provider_payment_id: String,
    pub client_secret: Option<String>,
    pub status: ProviderPaymentStatus,
}

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub provider_refund_id: String,
    pub status: ProviderPaymentStatus,
}

/// Capability boundary to the external charge API. Nothing outside the
/// concrete implementation imports a provider SDK type, so the rest of the
/// core can swap providers or use a test double.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;

    /// Create a payment intent for `amount_minor_units` (the grossed-up
    /// total, fee included).
    async fn create_intent(
        &self,
        amount_minor_units: i64,
        currency: &str,
        description: &str,
    ) -> Result<IntentOutcome>;

    async fn create_refund(
        &self,
        provider_payment_id: &str,
        amount_minor_units: i64,
        reason: &str,
    ) -> Result<RefundOutcome>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use fake::{FakeProvider, RecordedIntent, RecordedRefund};

#[cfg(any(test, feature = "test-utils"))]
mod fake {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{AppError, Result};

    use super::{IntentOutcome, ProviderClient, ProviderPaymentStatus, RefundOutcome};

    #[derive(Debug, Clone)]
    pub struct RecordedIntent {
        pub amount_minor_units: i64,
        pub currency: String,
        pub description: String,
    }

    #[derive(Debug, Clone)]
    pub struct RecordedRefund {
        pub provider_payment_id: String,
        pub amount_minor_units: i64,
        pub reason: String,
    }

    /// In-memory provider double for tests: records every call and can be
    /// told to reject the next N calls.
    #[derive(Default)]
    pub struct FakeProvider {
        intents: Mutex<Vec<RecordedIntent>>,
        refunds: Mutex<Vec<RecordedRefund>>,
        fail_intents: Mutex<u32>,
        fail_refunds: Mutex<u32>,
    }

    impl FakeProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject the next `n` create_intent calls with a provider error.
        pub fn fail_next_intents(&self, n: u32) {
            *self.fail_intents.lock().unwrap() = n;
        }

        /// Reject the next `n` create_refund calls with a provider error.
        pub fn fail_next_refunds(&self, n: u32) {
            *self.fail_refunds.lock().unwrap() = n;
        }

        pub fn intent_calls(&self) -> Vec<RecordedIntent> {
            self.intents.lock().unwrap().clone()
        }

        pub fn refund_calls(&self) -> Vec<RecordedRefund> {
            self.refunds.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProviderClient for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn create_intent(
            &self,
            amount_minor_units: i64,
            currency: &str,
            description: &str,
        ) -> Result<IntentOutcome> {
            if amount_minor_units <= 0 {
                return Err(AppError::Validation("amount must be positive".to_string()));
            }

            {
                let mut failures = self.fail_intents.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(AppError::Provider("simulated intent failure".to_string()));
                }
            }

            let mut intents = self.intents.lock().unwrap();
            intents.push(RecordedIntent {
                amount_minor_units,
                currency: currency.to_lowercase(),
                description: description.to_string(),
            });
            let n = intents.len();

            Ok(IntentOutcome {
                provider_payment_id: format!("pi_fake_{}", n),
                client_secret: Some(format!("pi_fake_{}_secret", n)),
                status: ProviderPaymentStatus::Pending,
            })
        }

        async fn create_refund(
            &self,
            provider_payment_id: &str,
            amount_minor_units: i64,
            reason: &str,
        ) -> Result<RefundOutcome> {
            if amount_minor_units <= 0 {
                return Err(AppError::Validation("amount must be positive".to_string()));
            }

            {
                let mut failures = self.fail_refunds.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(AppError::Provider("simulated refund failure".to_string()));
                }
            }

            let mut refunds = self.refunds.lock().unwrap();
            refunds.push(RecordedRefund {
                provider_payment_id: provider_payment_id.to_string(),
                amount_minor_units,
                reason: reason.to_string(),
            });
            let n = refunds.len();

            Ok(RefundOutcome {
                provider_refund_id: format!("re_fake_{}", n),
                status: ProviderPaymentStatus::Succeeded,
            })
        }
    }
}
