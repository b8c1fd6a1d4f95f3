//! Application State

use std::sync::Arc;

use classpay_engine::{AttemptService, ReconciliationEngine, WebhookIngress};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Checkout-time attempt operations
    pub attempts: AttemptService,

    /// Attempt-to-registration conversion authority
    pub engine: Arc<ReconciliationEngine>,

    /// Authenticated webhook entry point
    pub ingress: Arc<WebhookIngress>,

    /// Whether real provider credentials are present
    pub provider_configured: bool,
}
