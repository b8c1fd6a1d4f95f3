//! Attempt Service
//!
//! Owns checkout-time operations on payment attempts: creation with an
//! optimistic capacity check, payment initialization against the provider
//! gateway, and the operator actions (cancel, notes).

use std::sync::Arc;

use chrono::Duration;
use serde::Deserialize;
use uuid::Uuid;

use classpay_core::{
    attempt::{new_provider_reference, DEFAULT_ATTEMPT_TTL_HOURS},
    AttemptStatus, AttemptStore, ClassCatalog, EngineError, PaymentAttempt, Result,
    StudentDescriptor,
};
use classpay_gateway::{InitializeRequest, InitializedTransaction, ProviderClient};

use crate::capacity::CapacityGuard;

/// Checkout request from the client
#[derive(Clone, Debug, Deserialize)]
pub struct CreateAttemptRequest {
    pub class_id: Uuid,
    pub parent_name: String,
    pub parent_email: String,
    #[serde(default)]
    pub parent_phone: Option<String>,
    #[serde(default)]
    pub parent_city: Option<String>,
    pub students: Vec<StudentDescriptor>,
    pub amount_cents: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Checkout-time operations on payment attempts
#[derive(Clone)]
pub struct AttemptService {
    attempts: Arc<dyn AttemptStore>,
    catalog: Arc<dyn ClassCatalog>,
    guard: CapacityGuard,
    provider: Arc<dyn ProviderClient>,
    provider_label: String,
    default_currency: String,
    attempt_ttl: Duration,
}

impl AttemptService {
    pub fn new(
        attempts: Arc<dyn AttemptStore>,
        catalog: Arc<dyn ClassCatalog>,
        guard: CapacityGuard,
        provider: Arc<dyn ProviderClient>,
    ) -> Self {
        Self {
            attempts,
            catalog,
            guard,
            provider,
            provider_label: "paystack".into(),
            default_currency: "NGN".into(),
            attempt_ttl: Duration::hours(DEFAULT_ATTEMPT_TTL_HOURS),
        }
    }

    /// Override the attempt TTL (tests, staged rollouts)
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.attempt_ttl = ttl;
        self
    }

    /// Start a checkout: validate the class, optimistically check capacity,
    /// and persist a PENDING attempt.
    ///
    /// The capacity check here is advisory - seats are not held. The
    /// reconciliation engine re-validates before the final registration
    /// insert.
    pub async fn create_attempt(&self, request: CreateAttemptRequest) -> Result<PaymentAttempt> {
        let class = self
            .catalog
            .find_class(request.class_id)
            .await?
            .ok_or(EngineError::ClassNotFound(request.class_id))?;
        if !class.published {
            return Err(EngineError::ClassNotPublished(class.id));
        }

        let seats_needed = request.students.len() as u32;
        if self.guard.remaining_for(&class).await? < seats_needed {
            return Err(EngineError::ClassFull(class.id));
        }

        let mut attempt = PaymentAttempt::with_ttl(
            request.class_id,
            request.parent_name,
            request.parent_email,
            request.students,
            request.amount_cents,
            request
                .currency
                .unwrap_or_else(|| self.default_currency.clone()),
            self.provider_label.clone(),
            self.attempt_ttl,
        )?;
        attempt.parent_phone = request.parent_phone;
        attempt.parent_city = request.parent_city;

        let attempt = self.attempts.create(attempt).await?;
        tracing::info!(
            attempt_id = %attempt.id,
            class_id = %attempt.class_id,
            students = attempt.students.len(),
            amount_cents = attempt.amount_cents,
            "Payment attempt created"
        );
        Ok(attempt)
    }

    /// Initialize the hosted payment for a pending attempt.
    ///
    /// Re-initializing an attempt that already holds provider details
    /// returns them unchanged rather than opening a second transaction.
    pub async fn initialize_payment(&self, attempt_id: Uuid) -> Result<InitializedTransaction> {
        let attempt = self
            .attempts
            .get(attempt_id)
            .await?
            .ok_or_else(|| EngineError::AttemptNotFound(attempt_id.to_string()))?;

        if attempt.status != AttemptStatus::Pending {
            return Err(EngineError::InvalidCheckout(format!(
                "attempt is {}, payment can no longer be initialized",
                attempt.status
            )));
        }

        if let (Some(reference), Some(payment_url)) =
            (&attempt.provider_reference, &attempt.payment_url)
        {
            return Ok(InitializedTransaction {
                authorization_url: payment_url.clone(),
                reference: reference.clone(),
            });
        }

        let reference = new_provider_reference();
        let initialized = self
            .provider
            .initialize_transaction(&InitializeRequest {
                email: attempt.parent_email.clone(),
                amount_cents: attempt.amount_cents,
                reference: reference.clone(),
                callback_url: None,
                metadata: serde_json::json!({
                    "attempt_id": attempt.id,
                    "class_id": attempt.class_id,
                }),
            })
            .await?;

        self.attempts
            .attach_provider_details(
                attempt.id,
                &initialized.reference,
                &initialized.authorization_url,
            )
            .await?;

        tracing::info!(
            attempt_id = %attempt.id,
            reference = %initialized.reference,
            "Payment initialized"
        );
        Ok(initialized)
    }

    /// Operator action: cancel a pending attempt
    pub async fn cancel(&self, attempt_id: Uuid) -> Result<PaymentAttempt> {
        let attempt = self.attempts.cancel(attempt_id).await?;
        tracing::info!(attempt_id = %attempt.id, "Payment attempt cancelled");
        Ok(attempt)
    }

    /// Operator action: replace the notes on an attempt
    pub async fn update_notes(&self, attempt_id: Uuid, notes: &str) -> Result<PaymentAttempt> {
        self.attempts.update_notes(attempt_id, notes).await
    }
}
