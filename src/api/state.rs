use std::sync::Arc;

use crate::webhooks::WebhookProcessor;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<WebhookProcessor>,
    /// The one provider this deployment accepts callbacks for.
    pub provider_name: String,
}

impl AppState {
    pub fn new(processor: Arc<WebhookProcessor>, provider_name: String) -> Self {
        Self {
            processor,
            provider_name,
        }
    }
}
