//! Entity Stores
//!
//! Storage traits for attempts, registrations, and payments, with in-memory
//! implementations for development and tests. The store is the sole source
//! of mutual exclusion in the system: provider-reference uniqueness, the
//! completion claim, and the capacity-checked registration insert are all
//! atomic at this layer, the in-memory analog of row-level constraints.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::attempt::{AttemptStatus, PaymentAttempt};
use crate::error::{EngineError, Result};
use crate::registration::{Payment, PaymentStatus, Registration};

/// Outcome of a completion claim on an attempt.
///
/// Concurrent reconciliations for the same reference race on this claim:
/// the first writer wins, the loser observes `AlreadyCompleted` and re-reads
/// the stored result instead of creating a second set of registrations.
#[derive(Clone, Debug)]
pub enum ClaimOutcome {
    /// This caller performed the PENDING -> COMPLETED transition
    Claimed(PaymentAttempt),
    /// Another caller completed the attempt first
    AlreadyCompleted(PaymentAttempt),
}

/// Payment attempt storage
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Persist a new attempt
    async fn create(&self, attempt: PaymentAttempt) -> Result<PaymentAttempt>;

    /// Fetch by id
    async fn get(&self, id: Uuid) -> Result<Option<PaymentAttempt>>;

    /// Fetch by provider reference
    async fn find_by_reference(&self, reference: &str) -> Result<Option<PaymentAttempt>>;

    /// Attach provider reference and payment URL without a state change.
    ///
    /// Enforces reference uniqueness across all attempts.
    async fn attach_provider_details(
        &self,
        id: Uuid,
        reference: &str,
        payment_url: &str,
    ) -> Result<PaymentAttempt>;

    /// Atomically claim a pending attempt for completion.
    ///
    /// Errors with `InvalidTransition` when the attempt is CANCELLED or
    /// EXPIRED - a verified payment against a dead attempt is a state
    /// conflict that needs operator attention, not a silent completion.
    async fn claim_for_completion(&self, id: Uuid, at: DateTime<Utc>) -> Result<ClaimOutcome>;

    /// Transition PENDING -> CANCELLED. Cancelling an already cancelled
    /// attempt is a no-op; cancelling a COMPLETED attempt is an error.
    async fn cancel(&self, id: Uuid) -> Result<PaymentAttempt>;

    /// Replace operator notes
    async fn update_notes(&self, id: Uuid, notes: &str) -> Result<PaymentAttempt>;

    /// Bulk-transition PENDING attempts past their TTL to EXPIRED.
    /// Returns the attempts that were expired by this call.
    async fn expire_pending_before(&self, now: DateTime<Utc>) -> Result<Vec<PaymentAttempt>>;

    /// All PENDING attempts (reminder sweep input)
    async fn list_pending(&self) -> Result<Vec<PaymentAttempt>>;
}

/// Registration storage
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Insert a registration only if the class has not reached `capacity`.
    ///
    /// The count and insert happen in one critical section so concurrent
    /// reconciliations cannot oversell a class.
    async fn create_within_capacity(
        &self,
        registration: Registration,
        capacity: u32,
    ) -> Result<Registration>;

    async fn get(&self, id: Uuid) -> Result<Option<Registration>>;

    /// Committed registrations for a class
    async fn count_for_class(&self, class_id: Uuid) -> Result<u32>;

    /// Registrations created from a given attempt
    async fn list_for_attempt(&self, attempt_id: Uuid) -> Result<Vec<Registration>>;

    /// Registrations with payment still pending (reminder sweep input)
    async fn list_unpaid(&self) -> Result<Vec<Registration>>;

    /// All registrations (upcoming-class reminder input)
    async fn list_all(&self) -> Result<Vec<Registration>>;

    /// Mark a registration's payment resolved
    async fn mark_paid(&self, id: Uuid) -> Result<Registration>;
}

/// Payment storage
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn create(&self, payment: Payment) -> Result<Payment>;

    async fn get(&self, id: Uuid) -> Result<Option<Payment>>;

    /// Fetch by provider reference (legacy single-payment path)
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>>;

    /// All payments behind one registration
    async fn list_for_registration(&self, registration_id: Uuid) -> Result<Vec<Payment>>;

    /// Mark a payment PAID
    async fn mark_paid(&self, id: Uuid, paid_at: DateTime<Utc>) -> Result<Payment>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// In-memory attempt store
pub struct MemoryAttemptStore {
    attempts: RwLock<HashMap<Uuid, PaymentAttempt>>,
    by_reference: RwLock<HashMap<String, Uuid>>,
}

impl Default for MemoryAttemptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self {
            attempts: RwLock::new(HashMap::new()),
            by_reference: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn create(&self, attempt: PaymentAttempt) -> Result<PaymentAttempt> {
        let mut attempts = self.attempts.write().unwrap();
        attempts.insert(attempt.id, attempt.clone());
        Ok(attempt)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentAttempt>> {
        Ok(self.attempts.read().unwrap().get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<PaymentAttempt>> {
        let by_ref = self.by_reference.read().unwrap();
        let attempts = self.attempts.read().unwrap();
        Ok(by_ref.get(reference).and_then(|id| attempts.get(id)).cloned())
    }

    async fn attach_provider_details(
        &self,
        id: Uuid,
        reference: &str,
        payment_url: &str,
    ) -> Result<PaymentAttempt> {
        let mut by_ref = self.by_reference.write().unwrap();
        let mut attempts = self.attempts.write().unwrap();

        if let Some(existing) = by_ref.get(reference) {
            if *existing != id {
                return Err(EngineError::DuplicateReference(reference.to_string()));
            }
        }

        let attempt = attempts
            .get_mut(&id)
            .ok_or_else(|| EngineError::AttemptNotFound(id.to_string()))?;

        attempt.provider_reference = Some(reference.to_string());
        attempt.payment_url = Some(payment_url.to_string());
        by_ref.insert(reference.to_string(), id);
        Ok(attempt.clone())
    }

    async fn claim_for_completion(&self, id: Uuid, at: DateTime<Utc>) -> Result<ClaimOutcome> {
        let mut attempts = self.attempts.write().unwrap();
        let attempt = attempts
            .get_mut(&id)
            .ok_or_else(|| EngineError::AttemptNotFound(id.to_string()))?;

        match attempt.status {
            AttemptStatus::Pending => {
                attempt.transition(AttemptStatus::Completed, at)?;
                Ok(ClaimOutcome::Claimed(attempt.clone()))
            }
            AttemptStatus::Completed => Ok(ClaimOutcome::AlreadyCompleted(attempt.clone())),
            _ => Err(EngineError::InvalidTransition {
                from: attempt.status,
                to: AttemptStatus::Completed,
            }),
        }
    }

    async fn cancel(&self, id: Uuid) -> Result<PaymentAttempt> {
        let mut attempts = self.attempts.write().unwrap();
        let attempt = attempts
            .get_mut(&id)
            .ok_or_else(|| EngineError::AttemptNotFound(id.to_string()))?;

        if attempt.status == AttemptStatus::Cancelled {
            return Ok(attempt.clone());
        }
        attempt.transition(AttemptStatus::Cancelled, Utc::now())?;
        Ok(attempt.clone())
    }

    async fn update_notes(&self, id: Uuid, notes: &str) -> Result<PaymentAttempt> {
        let mut attempts = self.attempts.write().unwrap();
        let attempt = attempts
            .get_mut(&id)
            .ok_or_else(|| EngineError::AttemptNotFound(id.to_string()))?;
        attempt.notes = Some(notes.to_string());
        Ok(attempt.clone())
    }

    async fn expire_pending_before(&self, now: DateTime<Utc>) -> Result<Vec<PaymentAttempt>> {
        let mut attempts = self.attempts.write().unwrap();
        let mut expired = Vec::new();
        for attempt in attempts.values_mut() {
            if attempt.is_expired(now) {
                attempt.transition(AttemptStatus::Expired, now)?;
                expired.push(attempt.clone());
            }
        }
        Ok(expired)
    }

    async fn list_pending(&self) -> Result<Vec<PaymentAttempt>> {
        Ok(self
            .attempts
            .read()
            .unwrap()
            .values()
            .filter(|a| a.status == AttemptStatus::Pending)
            .cloned()
            .collect())
    }
}

/// In-memory registration store
pub struct MemoryRegistrationStore {
    registrations: RwLock<HashMap<Uuid, Registration>>,
}

impl Default for MemoryRegistrationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistrationStore {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RegistrationStore for MemoryRegistrationStore {
    async fn create_within_capacity(
        &self,
        registration: Registration,
        capacity: u32,
    ) -> Result<Registration> {
        let mut registrations = self.registrations.write().unwrap();
        let count = registrations
            .values()
            .filter(|r| r.class_id == registration.class_id)
            .count() as u32;
        if count >= capacity {
            return Err(EngineError::ClassFull(registration.class_id));
        }
        registrations.insert(registration.id, registration.clone());
        Ok(registration)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Registration>> {
        Ok(self.registrations.read().unwrap().get(&id).cloned())
    }

    async fn count_for_class(&self, class_id: Uuid) -> Result<u32> {
        Ok(self
            .registrations
            .read()
            .unwrap()
            .values()
            .filter(|r| r.class_id == class_id)
            .count() as u32)
    }

    async fn list_for_attempt(&self, attempt_id: Uuid) -> Result<Vec<Registration>> {
        Ok(self
            .registrations
            .read()
            .unwrap()
            .values()
            .filter(|r| r.attempt_id == Some(attempt_id))
            .cloned()
            .collect())
    }

    async fn list_unpaid(&self) -> Result<Vec<Registration>> {
        Ok(self
            .registrations
            .read()
            .unwrap()
            .values()
            .filter(|r| r.payment_status == PaymentStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Registration>> {
        Ok(self.registrations.read().unwrap().values().cloned().collect())
    }

    async fn mark_paid(&self, id: Uuid) -> Result<Registration> {
        let mut registrations = self.registrations.write().unwrap();
        let registration = registrations
            .get_mut(&id)
            .ok_or_else(|| EngineError::Storage(format!("registration not found: {}", id)))?;
        registration.payment_status = PaymentStatus::Paid;
        Ok(registration.clone())
    }
}

/// In-memory payment store
pub struct MemoryPaymentStore {
    payments: RwLock<HashMap<Uuid, Payment>>,
    by_reference: RwLock<HashMap<String, Uuid>>,
}

impl Default for MemoryPaymentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self {
            payments: RwLock::new(HashMap::new()),
            by_reference: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn create(&self, payment: Payment) -> Result<Payment> {
        let mut payments = self.payments.write().unwrap();
        let mut by_ref = self.by_reference.write().unwrap();
        // Multi-student attempts share one reference; the index keeps the
        // first payment for the legacy lookup path.
        by_ref
            .entry(payment.provider_reference.clone())
            .or_insert(payment.id);
        payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.payments.read().unwrap().get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let by_ref = self.by_reference.read().unwrap();
        let payments = self.payments.read().unwrap();
        Ok(by_ref.get(reference).and_then(|id| payments.get(id)).cloned())
    }

    async fn list_for_registration(&self, registration_id: Uuid) -> Result<Vec<Payment>> {
        Ok(self
            .payments
            .read()
            .unwrap()
            .values()
            .filter(|p| p.registration_id == registration_id)
            .cloned()
            .collect())
    }

    async fn mark_paid(&self, id: Uuid, paid_at: DateTime<Utc>) -> Result<Payment> {
        let mut payments = self.payments.write().unwrap();
        let payment = payments
            .get_mut(&id)
            .ok_or_else(|| EngineError::Storage(format!("payment not found: {}", id)))?;
        payment.status = PaymentStatus::Paid;
        payment.paid_at = Some(paid_at);
        Ok(payment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::StudentDescriptor;
    use chrono::Duration;

    fn attempt() -> PaymentAttempt {
        PaymentAttempt::new(
            Uuid::new_v4(),
            "Ada Obi",
            "ada@example.com",
            vec![StudentDescriptor {
                name: "Chidi".into(),
                age: None,
                school: None,
            }],
            150_000,
            "NGN",
            "paystack",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_reference_uniqueness() {
        let store = MemoryAttemptStore::new();
        let a = store.create(attempt()).await.unwrap();
        let b = store.create(attempt()).await.unwrap();

        store
            .attach_provider_details(a.id, "cp_abc", "https://pay.example/abc")
            .await
            .unwrap();

        // Re-attaching the same reference to the same attempt is fine
        store
            .attach_provider_details(a.id, "cp_abc", "https://pay.example/abc")
            .await
            .unwrap();

        let err = store
            .attach_provider_details(b.id, "cp_abc", "https://pay.example/abc")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateReference(_)));
    }

    #[tokio::test]
    async fn test_claim_first_writer_wins() {
        let store = MemoryAttemptStore::new();
        let a = store.create(attempt()).await.unwrap();

        let first = store.claim_for_completion(a.id, Utc::now()).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(_)));

        let second = store.claim_for_completion(a.id, Utc::now()).await.unwrap();
        assert!(matches!(second, ClaimOutcome::AlreadyCompleted(_)));
    }

    #[tokio::test]
    async fn test_claim_rejects_cancelled_attempt() {
        let store = MemoryAttemptStore::new();
        let a = store.create(attempt()).await.unwrap();
        store.cancel(a.id).await.unwrap();

        let err = store
            .claim_for_completion(a.id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_completed_is_rejected() {
        let store = MemoryAttemptStore::new();
        let a = store.create(attempt()).await.unwrap();
        store.claim_for_completion(a.id, Utc::now()).await.unwrap();

        assert!(store.cancel(a.id).await.is_err());

        // Cancelling twice is a no-op, not an error
        let b = store.create(attempt()).await.unwrap();
        store.cancel(b.id).await.unwrap();
        let again = store.cancel(b.id).await.unwrap();
        assert_eq!(again.status, AttemptStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_expiry_sweep_is_idempotent() {
        let store = MemoryAttemptStore::new();
        let mut stale = attempt();
        stale.expires_at = Utc::now() - Duration::hours(1);
        let stale = store.create(stale).await.unwrap();
        let fresh = store.create(attempt()).await.unwrap();

        let expired = store.expire_pending_before(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);

        // Second sweep finds nothing to do
        let expired = store.expire_pending_before(Utc::now()).await.unwrap();
        assert!(expired.is_empty());

        assert_eq!(
            store.get(fresh.id).await.unwrap().unwrap().status,
            AttemptStatus::Pending
        );
        assert_eq!(
            store.get(stale.id).await.unwrap().unwrap().status,
            AttemptStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_capacity_enforced_at_insert() {
        let store = MemoryRegistrationStore::new();
        let class_id = Uuid::new_v4();

        for _ in 0..2 {
            let reg = Registration::from_attempt(
                class_id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
            );
            store.create_within_capacity(reg, 2).await.unwrap();
        }

        let overflow = Registration::from_attempt(
            class_id,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        let err = store.create_within_capacity(overflow, 2).await.unwrap_err();
        assert!(matches!(err, EngineError::ClassFull(_)));
        assert_eq!(store.count_for_class(class_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_payment_reference_lookup() {
        let store = MemoryPaymentStore::new();
        let reg_id = Uuid::new_v4();
        let p = store
            .create(Payment::paid(
                reg_id,
                150_000,
                "NGN",
                "paystack",
                "cp_ref1",
                Utc::now(),
            ))
            .await
            .unwrap();

        let found = store.find_by_reference("cp_ref1").await.unwrap().unwrap();
        assert_eq!(found.id, p.id);
        assert!(store.find_by_reference("cp_other").await.unwrap().is_none());
    }
}
