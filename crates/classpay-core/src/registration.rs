//! Registrations and Payments
//!
//! A `Registration` is a durable, capacity-consuming seat claim. A `Payment`
//! is the financial record behind it: 1:1 for legacy registrations, one per
//! student for attempt-derived registrations. Neither is ever deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a registration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationSource {
    Website,
    Operator,
}

/// Payment status on a registration or payment record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Free class - no payment applies
    Na,
    Pending,
    Paid,
    Failed,
}

/// Attendance bookkeeping, resolved after the class runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Registered,
    Attended,
    NoShow,
}

/// A parent record, find-or-created by email
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Parent {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A student record, find-or-created by (parent, name)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub name: String,
    pub age: Option<u8>,
    pub school: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A durable seat claim against a class
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Registration {
    pub id: Uuid,
    pub class_id: Uuid,
    pub parent_id: Uuid,
    pub student_id: Uuid,

    /// Attempt this registration was reconciled from, None on the legacy path
    pub attempt_id: Option<Uuid>,

    pub source: RegistrationSource,
    pub payment_status: PaymentStatus,
    pub attendance_status: AttendanceStatus,
    pub created_at: DateTime<Utc>,
}

impl Registration {
    /// Create a registration reconciled from a paid attempt
    pub fn from_attempt(
        class_id: Uuid,
        parent_id: Uuid,
        student_id: Uuid,
        attempt_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            class_id,
            parent_id,
            student_id,
            attempt_id: Some(attempt_id),
            source: RegistrationSource::Website,
            payment_status: PaymentStatus::Paid,
            attendance_status: AttendanceStatus::Registered,
            created_at: Utc::now(),
        }
    }
}

/// A financial record tied to one registration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub provider: String,
    pub provider_reference: String,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Create a paid payment record for an attempt-derived registration
    pub fn paid(
        registration_id: Uuid,
        amount_cents: i64,
        currency: impl Into<String>,
        provider: impl Into<String>,
        provider_reference: impl Into<String>,
        paid_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            registration_id,
            amount_cents,
            currency: currency.into(),
            provider: provider.into(),
            provider_reference: provider_reference.into(),
            status: PaymentStatus::Paid,
            paid_at: Some(paid_at),
            created_at: Utc::now(),
        }
    }
}

/// Split a total amount across `parts` recipients in integer cents.
///
/// Integer division; the remainder is assigned to the first part, so the
/// parts always sum back to `total_cents` exactly. 1000 / 3 -> [334, 333, 333].
pub fn split_amount_cents(total_cents: i64, parts: usize) -> Vec<i64> {
    if parts == 0 {
        return Vec::new();
    }
    let n = parts as i64;
    let base = total_cents / n;
    let remainder = total_cents % n;

    let mut amounts = vec![base; parts];
    amounts[0] += remainder;
    amounts
}
