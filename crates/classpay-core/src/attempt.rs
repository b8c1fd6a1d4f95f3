//! Payment Attempts
//!
//! A `PaymentAttempt` is an unconfirmed checkout intent. It is created when a
//! parent starts checkout, enriched with provider details at initialization,
//! and terminally transitioned by the reconciliation engine or the scheduler.
//! Attempts are never deleted - they are the audit trail of a transaction.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Default time-to-live for a pending attempt
pub const DEFAULT_ATTEMPT_TTL_HOURS: i64 = 24;

/// Attempt lifecycle states
///
/// `Pending` is the only non-terminal state. All three terminal states are
/// final; no transition leaves them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Pending,
    Completed,
    Cancelled,
    Expired,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "PENDING",
            AttemptStatus::Completed => "COMPLETED",
            AttemptStatus::Cancelled => "CANCELLED",
            AttemptStatus::Expired => "EXPIRED",
        }
    }

    /// Whether this state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Pending)
    }

    /// Check whether a transition to `to` is allowed
    pub fn can_transition_to(&self, to: AttemptStatus) -> bool {
        matches!(self, AttemptStatus::Pending) && to.is_terminal()
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One student on a checkout, as entered by the parent.
///
/// Not yet a `Student` record - the directory find-or-creates those during
/// reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentDescriptor {
    pub name: String,
    #[serde(default)]
    pub age: Option<u8>,
    #[serde(default)]
    pub school: Option<String>,
}

/// An unconfirmed checkout intent
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: Uuid,

    /// Class the parent is registering for
    pub class_id: Uuid,

    /// Parent identity, denormalized - not yet a Parent record
    pub parent_name: String,
    pub parent_email: String,
    pub parent_phone: Option<String>,
    pub parent_city: Option<String>,

    /// Students to register (at least one)
    pub students: Vec<StudentDescriptor>,

    /// Total amount in integer cents, always positive
    pub amount_cents: i64,
    pub currency: String,

    /// Payment provider handling this attempt
    pub provider: String,

    /// Provider transaction reference, unique once set
    pub provider_reference: Option<String>,

    /// Hosted payment page URL returned by the provider
    pub payment_url: Option<String>,

    pub status: AttemptStatus,

    /// Operator notes (capacity conflicts, manual reconciliation, etc.)
    pub notes: Option<String>,

    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PaymentAttempt {
    /// Create a new pending attempt with the default TTL
    pub fn new(
        class_id: Uuid,
        parent_name: impl Into<String>,
        parent_email: impl Into<String>,
        students: Vec<StudentDescriptor>,
        amount_cents: i64,
        currency: impl Into<String>,
        provider: impl Into<String>,
    ) -> Result<Self> {
        Self::with_ttl(
            class_id,
            parent_name,
            parent_email,
            students,
            amount_cents,
            currency,
            provider,
            Duration::hours(DEFAULT_ATTEMPT_TTL_HOURS),
        )
    }

    /// Create a new pending attempt with an explicit TTL
    #[allow(clippy::too_many_arguments)]
    pub fn with_ttl(
        class_id: Uuid,
        parent_name: impl Into<String>,
        parent_email: impl Into<String>,
        students: Vec<StudentDescriptor>,
        amount_cents: i64,
        currency: impl Into<String>,
        provider: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self> {
        if amount_cents <= 0 {
            return Err(EngineError::InvalidCheckout(format!(
                "amount must be positive, got {} cents",
                amount_cents
            )));
        }
        if students.is_empty() {
            return Err(EngineError::InvalidCheckout(
                "at least one student is required".into(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            class_id,
            parent_name: parent_name.into(),
            parent_email: parent_email.into(),
            parent_phone: None,
            parent_city: None,
            students,
            amount_cents,
            currency: currency.into(),
            provider: provider.into(),
            provider_reference: None,
            payment_url: None,
            status: AttemptStatus::Pending,
            notes: None,
            expires_at: now + ttl,
            completed_at: None,
            created_at: now,
        })
    }

    /// Whether this attempt is past its TTL and still pending
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == AttemptStatus::Pending && self.expires_at < now
    }

    /// Validate and apply a state transition
    pub fn transition(&mut self, to: AttemptStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to == AttemptStatus::Completed {
            self.completed_at = Some(now);
        }
        Ok(())
    }
}

/// Generate a provider transaction reference for an attempt
pub fn new_provider_reference() -> String {
    format!("cp_{}", Uuid::new_v4().simple())
}
