//! Webhook Ingress
//!
//! Authenticates inbound provider webhooks and routes charge events into the
//! reconciliation engine. Transport acknowledgement is decoupled from the
//! business outcome: a bad or missing signature is the only condition that
//! refuses the delivery. Everything after authentication is acknowledged and
//! its outcome, errors included, lands in the audit log for operator
//! follow-up. Returning an error to the provider for a business failure
//! would only trigger redeliveries that fail the same way.

use std::sync::Arc;

use serde::Serialize;

use classpay_core::{AuditLog, EngineError, Result, WebhookOutcome, WebhookRecord};
use classpay_gateway::{authenticate_webhook, ConfigResolver, WebhookEvent};

use crate::reconcile::{ReconciliationEngine, ReconciliationOutcome};

/// Acknowledgement returned to the provider after an authenticated delivery
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookAck {
    /// Charge event was reconciled; outcome attached
    Processed {
        #[serde(flatten)]
        outcome: ReconciliationOutcome,
    },
    /// Authenticated event with no side effects for us
    Ignored { event_type: String },
    /// Reconciliation failed; recorded for operator follow-up
    Accepted { event_type: String },
}

/// Authenticated entry point for provider webhooks
pub struct WebhookIngress {
    resolve_config: ConfigResolver,
    engine: Arc<ReconciliationEngine>,
    audit: Arc<dyn AuditLog>,
}

impl WebhookIngress {
    pub fn new(
        resolve_config: ConfigResolver,
        engine: Arc<ReconciliationEngine>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            resolve_config,
            engine,
            audit,
        }
    }

    /// Handle one webhook delivery.
    ///
    /// Returns `Err(Authentication)` for a missing or invalid signature,
    /// which the HTTP layer maps to a refusal. Any other path is an
    /// acknowledgement.
    pub async fn handle(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookAck> {
        let config = (self.resolve_config)()?;
        let signature = signature_header
            .ok_or_else(|| EngineError::Authentication("missing signature header".into()))?;

        let event = authenticate_webhook(&config.webhook_secret, raw_body, signature)?;

        match &event {
            WebhookEvent::ChargeSucceeded { reference } => {
                self.process_charge_success(&event, reference).await
            }
            WebhookEvent::ChargeFailed { reference } => {
                tracing::info!(reference = %reference, "Provider reported failed charge");
                self.record(&event, WebhookOutcome::Ignored).await;
                Ok(WebhookAck::Ignored {
                    event_type: event.event_type().to_string(),
                })
            }
            WebhookEvent::Unhandled { event_type } => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event");
                self.record(&event, WebhookOutcome::Ignored).await;
                Ok(WebhookAck::Ignored {
                    event_type: event_type.clone(),
                })
            }
        }
    }

    async fn process_charge_success(
        &self,
        event: &WebhookEvent,
        reference: &str,
    ) -> Result<WebhookAck> {
        match self.engine.reconcile(reference).await {
            Ok(outcome) => {
                self.record(event, WebhookOutcome::Processed).await;
                Ok(WebhookAck::Processed { outcome })
            }
            Err(e) => {
                tracing::error!(
                    reference = %reference,
                    error = %e,
                    "Webhook reconciliation failed; acknowledged for redelivery safety"
                );
                self.record(event, WebhookOutcome::Error(e.to_string())).await;
                Ok(WebhookAck::Accepted {
                    event_type: event.event_type().to_string(),
                })
            }
        }
    }

    /// Audit recording must never turn an acknowledgement into a refusal
    async fn record(&self, event: &WebhookEvent, outcome: WebhookOutcome) {
        let record = WebhookRecord::new(
            event.event_type(),
            event.reference().map(str::to_string),
            outcome,
        );
        if let Err(e) = self.audit.record_webhook(record).await {
            tracing::warn!(error = %e, "Failed to record webhook audit entry");
        }
    }
}
