//! Error Taxonomy
//!
//! Every component boundary re-classifies provider and store failures into
//! this taxonomy before they cross into the reconciliation engine.

use thiserror::Error;
use uuid::Uuid;

use crate::attempt::AttemptStatus;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    /// Provider credentials missing or malformed - fatal, never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Provider returned a 4xx validation response - surfaced verbatim
    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    /// Network failure or provider 5xx - safe to retry
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Webhook signature verification failed - rejected at the edge
    #[error("Webhook authentication failed: {0}")]
    Authentication(String),

    /// Class does not exist
    #[error("Class not found: {0}")]
    ClassNotFound(Uuid),

    /// Class exists but is not open for registration
    #[error("Class is not published: {0}")]
    ClassNotPublished(Uuid),

    /// No seats left for the requested student count
    #[error("Class is full: {0}")]
    ClassFull(Uuid),

    /// Payment attempt not found by id or provider reference
    #[error("Payment attempt not found: {0}")]
    AttemptNotFound(String),

    /// Checkout request failed validation (amount, students)
    #[error("Invalid checkout: {0}")]
    InvalidCheckout(String),

    /// Disallowed attempt state transition
    #[error("Invalid attempt transition: {from} -> {to}")]
    InvalidTransition {
        from: AttemptStatus,
        to: AttemptStatus,
    },

    /// Provider reference already attached to another attempt
    #[error("Duplicate provider reference: {0}")]
    DuplicateReference(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Check if this error is retryable.
    ///
    /// Verification is read-only and reconciliation is idempotent, so
    /// provider outages and storage hiccups are safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ProviderUnavailable(_) | EngineError::Storage(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Configuration(_) => "Payments are not configured.".into(),
            EngineError::ProviderRejected(msg) => format!("Payment was rejected: {}", msg),
            EngineError::ProviderUnavailable(_) => {
                "The payment provider is currently unavailable. Please try again.".into()
            }
            EngineError::Authentication(_) => "Request could not be authenticated.".into(),
            EngineError::ClassNotFound(_) => "This class does not exist.".into(),
            EngineError::ClassNotPublished(_) => "This class is not open for registration.".into(),
            EngineError::ClassFull(_) => "This class is full.".into(),
            EngineError::AttemptNotFound(_) => "Checkout session not found.".into(),
            EngineError::InvalidCheckout(msg) => format!("Invalid checkout: {}", msg),
            _ => "An unexpected error occurred.".into(),
        }
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "CONFIGURATION_ERROR",
            EngineError::ProviderRejected(_) => "PROVIDER_REJECTED",
            EngineError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            EngineError::Authentication(_) => "AUTHENTICATION_ERROR",
            EngineError::ClassNotFound(_) => "CLASS_NOT_FOUND",
            EngineError::ClassNotPublished(_) => "CLASS_NOT_PUBLISHED",
            EngineError::ClassFull(_) => "CLASS_FULL",
            EngineError::AttemptNotFound(_) => "ATTEMPT_NOT_FOUND",
            EngineError::InvalidCheckout(_) => "INVALID_CHECKOUT",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::DuplicateReference(_) => "DUPLICATE_REFERENCE",
            EngineError::Storage(_) => "STORAGE_ERROR",
            EngineError::Json(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}
