use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{
    Client, CreatePaymentIntent, CreatePaymentIntentAutomaticPaymentMethods, CreateRefund,
    Currency, PaymentIntent, PaymentIntentStatus, Refund,
};

use crate::error::{AppError, Result};

use super::{IntentOutcome, ProviderClient, ProviderPaymentStatus, RefundOutcome};

/// Concrete provider backed by the Stripe API. Holds its own constructed
/// client instance; the API key is injected here and nowhere else.
pub struct StripeProvider {
    client: Client,
}

impl StripeProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(api_key),
        }
    }
}

#[async_trait]
impl ProviderClient for StripeProvider {
    fn name(&self) -> &str {
        "stripe"
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
        let currency = parse_currency(currency)?;

        let mut params = CreatePaymentIntent::new(amount_minor_units, currency);
        params.description = Some(description);
        params.automatic_payment_methods = Some(CreatePaymentIntentAutomaticPaymentMethods {
            enabled: true,
            ..Default::default()
        });

        let intent = PaymentIntent::create(&self.client, params)
            .await
            .map_err(|e| AppError::Provider(format!("Stripe error: {}", e)))?;

        Ok(IntentOutcome {
            provider_payment_id: intent.id.to_string(),
            client_secret: intent.client_secret,
            status: convert_intent_status(intent.status),
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

        let intent_id = provider_payment_id
            .parse::<stripe::PaymentIntentId>()
            .map_err(|e| AppError::Validation(format!("invalid PaymentIntent id: {}", e)))?;

        let mut params = CreateRefund::new();
        params.payment_intent = Some(intent_id);
        params.amount = Some(amount_minor_units);
        // The free-text reason travels as metadata; Stripe's own reason
        // field only accepts its fixed enum.
        params.metadata = Some(HashMap::from([("reason".to_string(), reason.to_string())]));

        let refund = Refund::create(&self.client, params)
            .await
            .map_err(|e| AppError::Provider(format!("Stripe error: {}", e)))?;

        Ok(RefundOutcome {
            provider_refund_id: refund.id.to_string(),
            status: convert_refund_status(refund.status.as_deref()),
        })
    }
}

fn parse_currency(raw: &str) -> Result<Currency> {
    match raw.to_lowercase().as_str() {
        "usd" => Ok(Currency::USD),
        "eur" => Ok(Currency::EUR),
        "gbp" => Ok(Currency::GBP),
        "cad" => Ok(Currency::CAD),
        "aud" => Ok(Currency::AUD),
        other => Err(AppError::Validation(format!(
            "unsupported currency: {}",
            other
        ))),
    }
}

fn convert_intent_status(status: PaymentIntentStatus) -> ProviderPaymentStatus {
    match status {
        PaymentIntentStatus::Succeeded => ProviderPaymentStatus::Succeeded,
        PaymentIntentStatus::Canceled => ProviderPaymentStatus::Failed,
        // requires_payment_method, requires_confirmation, requires_action,
        // processing, requires_capture
        _ => ProviderPaymentStatus::Pending,
    }
}

fn convert_refund_status(status: Option<&str>) -> ProviderPaymentStatus {
    match status {
        Some("succeeded") => ProviderPaymentStatus::Succeeded,
        Some("failed") | Some("canceled") => ProviderPaymentStatus::Failed,
        _ => ProviderPaymentStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_is_case_insensitive() {
        assert_eq!(parse_currency("USD").unwrap(), Currency::USD);
        assert_eq!(parse_currency("usd").unwrap(), Currency::USD);
        assert_eq!(parse_currency("Eur").unwrap(), Currency::EUR);
    }

    #[test]
    fn unknown_currency_is_rejected() {
        assert!(parse_currency("xyz").is_err());
    }
}
