//! Reconciliation Engine
//!
//! Converts a provider-confirmed payment into durable domain records exactly
//! once. Given a provider reference it re-verifies with the gateway, claims
//! the matching attempt, and creates Parent/Student/Registration/Payment
//! records. The completed-attempt check plus the store-level completion
//! claim make `reconcile` safe to invoke any number of times for the same
//! reference: no two calls create two sets of registrations.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use classpay_core::{
    split_amount_cents, AttemptStatus, AttemptStore, ClaimOutcome, ClassCatalog,
    ConfirmationContext, EngineError, NotificationChannel, NotificationLog, NotificationLogStore,
    NotificationStatus, Notifier, ParentProfile, Payment, PaymentAttempt, PaymentStore,
    PartyDirectory, Registration, RegistrationStore, Result,
};
use classpay_gateway::{ProviderClient, VerifyStatus};

/// Durable records produced by one completed reconciliation
#[derive(Clone, Debug, Serialize)]
pub struct ReconciliationReceipt {
    pub attempt_id: Uuid,
    pub class_id: Uuid,
    pub registration_ids: Vec<Uuid>,
    pub payment_ids: Vec<Uuid>,
    pub amount_cents: i64,
}

/// Outcome of one reconciliation call.
///
/// `VerificationFailed` and `CapacityExceededPostPayment` are soft
/// conditions, not errors: the first leaves the attempt retryable, the
/// second marks the payment for manual operator resolution (never an
/// automatic refund).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationOutcome {
    /// This call created the registrations and payments
    Completed(ReconciliationReceipt),

    /// A previous call already completed this reference; prior result returned
    AlreadyCompleted(ReconciliationReceipt),

    /// Provider did not confirm the charge; the attempt stays PENDING
    VerificationFailed {
        reference: String,
        provider_status: String,
    },

    /// Payment succeeded but the class filled in the interim; the attempt is
    /// annotated for manual reconciliation and the money is never dropped
    CapacityExceededPostPayment { attempt_id: Uuid, reference: String },

    /// Legacy single-payment path: payment and registration marked PAID
    LegacyPaymentPaid {
        payment_id: Uuid,
        registration_id: Uuid,
    },

    /// No attempt or legacy payment matches this reference
    UnknownReference { reference: String },
}

/// The attempt-to-registration conversion authority.
///
/// No other component may create a `Registration` from an attempt.
pub struct ReconciliationEngine {
    provider: Arc<dyn ProviderClient>,
    attempts: Arc<dyn AttemptStore>,
    registrations: Arc<dyn RegistrationStore>,
    payments: Arc<dyn PaymentStore>,
    directory: Arc<dyn PartyDirectory>,
    catalog: Arc<dyn ClassCatalog>,
    notifier: Arc<dyn Notifier>,
    notification_log: Arc<dyn NotificationLogStore>,
}

impl ReconciliationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        attempts: Arc<dyn AttemptStore>,
        registrations: Arc<dyn RegistrationStore>,
        payments: Arc<dyn PaymentStore>,
        directory: Arc<dyn PartyDirectory>,
        catalog: Arc<dyn ClassCatalog>,
        notifier: Arc<dyn Notifier>,
        notification_log: Arc<dyn NotificationLogStore>,
    ) -> Self {
        Self {
            provider,
            attempts,
            registrations,
            payments,
            directory,
            catalog,
            notifier,
            notification_log,
        }
    }

    /// Reconcile a provider reference.
    ///
    /// Always re-verifies with the provider first - caller-supplied status
    /// (webhook payloads included) is never trusted for money-affecting
    /// state.
    pub async fn reconcile(&self, reference: &str) -> Result<ReconciliationOutcome> {
        let verified = self.provider.verify_transaction(reference).await?;

        if let Some(attempt) = self.attempts.find_by_reference(reference).await? {
            if attempt.status == AttemptStatus::Completed {
                tracing::debug!(
                    attempt_id = %attempt.id,
                    reference = %reference,
                    "Reconcile replay on completed attempt"
                );
                return Ok(ReconciliationOutcome::AlreadyCompleted(
                    self.receipt_for(&attempt).await?,
                ));
            }

            return match verified.status {
                VerifyStatus::Success => {
                    if verified.amount_cents != attempt.amount_cents {
                        tracing::warn!(
                            attempt_id = %attempt.id,
                            expected = attempt.amount_cents,
                            received = verified.amount_cents,
                            "Verified amount differs from attempt amount"
                        );
                    }
                    self.complete_attempt(&attempt, reference).await
                }
                status => {
                    // Deliberate asymmetry with success handling: a failed
                    // verification leaves the attempt PENDING and retryable
                    // by the same client.
                    tracing::info!(
                        attempt_id = %attempt.id,
                        reference = %reference,
                        provider_status = ?status,
                        "Verification did not confirm charge"
                    );
                    Ok(ReconciliationOutcome::VerificationFailed {
                        reference: reference.to_string(),
                        provider_status: format!("{:?}", status).to_lowercase(),
                    })
                }
            };
        }

        self.reconcile_legacy(reference, &verified.status).await
    }

    /// Claim the attempt and materialize its records.
    ///
    /// The claim is an atomic store-level CAS: under concurrent duplicate
    /// reconciliations the first writer wins and the loser re-reads the
    /// stored result.
    async fn complete_attempt(
        &self,
        attempt: &PaymentAttempt,
        reference: &str,
    ) -> Result<ReconciliationOutcome> {
        let now = Utc::now();
        let attempt = match self.attempts.claim_for_completion(attempt.id, now).await? {
            ClaimOutcome::Claimed(attempt) => attempt,
            ClaimOutcome::AlreadyCompleted(attempt) => {
                return Ok(ReconciliationOutcome::AlreadyCompleted(
                    self.receipt_for(&attempt).await?,
                ));
            }
        };

        let class = self
            .catalog
            .find_class(attempt.class_id)
            .await?
            .ok_or(EngineError::ClassNotFound(attempt.class_id))?;

        let seats_needed = attempt.students.len() as u32;
        let committed = self.registrations.count_for_class(class.id).await?;
        if class.capacity.saturating_sub(committed) < seats_needed {
            return self.flag_capacity_conflict(&attempt, reference).await;
        }

        let parent = self
            .directory
            .find_or_create_parent(
                &attempt.parent_email,
                &ParentProfile {
                    name: attempt.parent_name.clone(),
                    phone: attempt.parent_phone.clone(),
                    city: attempt.parent_city.clone(),
                },
            )
            .await?;

        let amounts = split_amount_cents(attempt.amount_cents, attempt.students.len());
        let mut registration_ids = Vec::with_capacity(attempt.students.len());
        let mut payment_ids = Vec::with_capacity(attempt.students.len());

        for (descriptor, amount_cents) in attempt.students.iter().zip(amounts) {
            let student = self
                .directory
                .find_or_create_student(parent.id, descriptor)
                .await?;

            let registration =
                Registration::from_attempt(class.id, parent.id, student.id, attempt.id);
            let registration = match self
                .registrations
                .create_within_capacity(registration, class.capacity)
                .await
            {
                Ok(registration) => registration,
                Err(EngineError::ClassFull(_)) => {
                    // Lost a late capacity race to a concurrent reconciliation.
                    return self.flag_capacity_conflict(&attempt, reference).await;
                }
                Err(e) => return Err(e),
            };

            let payment = self
                .payments
                .create(Payment::paid(
                    registration.id,
                    amount_cents,
                    attempt.currency.clone(),
                    attempt.provider.clone(),
                    reference,
                    now,
                ))
                .await?;

            registration_ids.push(registration.id);
            payment_ids.push(payment.id);

            self.notify_confirmation(&attempt, &class.title, &student.name, amount_cents)
                .await;
        }

        tracing::info!(
            attempt_id = %attempt.id,
            reference = %reference,
            registrations = registration_ids.len(),
            amount_cents = attempt.amount_cents,
            "Attempt reconciled to registrations"
        );

        Ok(ReconciliationOutcome::Completed(ReconciliationReceipt {
            attempt_id: attempt.id,
            class_id: attempt.class_id,
            registration_ids,
            payment_ids,
            amount_cents: attempt.amount_cents,
        }))
    }

    /// A payment landed for a class with no seats left. The attempt is
    /// annotated for operator follow-up; this engine never auto-refunds.
    async fn flag_capacity_conflict(
        &self,
        attempt: &PaymentAttempt,
        reference: &str,
    ) -> Result<ReconciliationOutcome> {
        tracing::warn!(
            attempt_id = %attempt.id,
            class_id = %attempt.class_id,
            reference = %reference,
            "Payment confirmed but class is full - manual reconciliation required"
        );
        self.attempts
            .update_notes(
                attempt.id,
                &format!(
                    "payment {} confirmed but class filled before registration; \
                     manual reconciliation required",
                    reference
                ),
            )
            .await?;
        Ok(ReconciliationOutcome::CapacityExceededPostPayment {
            attempt_id: attempt.id,
            reference: reference.to_string(),
        })
    }

    /// Legacy path: no attempt holds this reference, so look for a single
    /// payment row created outside the attempt flow.
    async fn reconcile_legacy(
        &self,
        reference: &str,
        status: &VerifyStatus,
    ) -> Result<ReconciliationOutcome> {
        let Some(payment) = self.payments.find_by_reference(reference).await? else {
            tracing::warn!(reference = %reference, "Reconcile called for unknown reference");
            return Ok(ReconciliationOutcome::UnknownReference {
                reference: reference.to_string(),
            });
        };

        if *status != VerifyStatus::Success {
            return Ok(ReconciliationOutcome::VerificationFailed {
                reference: reference.to_string(),
                provider_status: format!("{:?}", status).to_lowercase(),
            });
        }

        let now = Utc::now();
        let payment = self.payments.mark_paid(payment.id, now).await?;
        let registration = self.registrations.mark_paid(payment.registration_id).await?;

        tracing::info!(
            payment_id = %payment.id,
            registration_id = %registration.id,
            reference = %reference,
            "Legacy payment reconciled"
        );

        Ok(ReconciliationOutcome::LegacyPaymentPaid {
            payment_id: payment.id,
            registration_id: registration.id,
        })
    }

    /// Rebuild the receipt for an attempt that was completed earlier
    async fn receipt_for(&self, attempt: &PaymentAttempt) -> Result<ReconciliationReceipt> {
        let registrations = self.registrations.list_for_attempt(attempt.id).await?;
        let mut registration_ids = Vec::with_capacity(registrations.len());
        let mut payment_ids = Vec::new();
        for registration in &registrations {
            registration_ids.push(registration.id);
            for payment in self.payments.list_for_registration(registration.id).await? {
                payment_ids.push(payment.id);
            }
        }
        Ok(ReconciliationReceipt {
            attempt_id: attempt.id,
            class_id: attempt.class_id,
            registration_ids,
            payment_ids,
            amount_cents: attempt.amount_cents,
        })
    }

    /// Best-effort confirmation dispatch. Failures are logged and recorded;
    /// they never unwind the payment.
    async fn notify_confirmation(
        &self,
        attempt: &PaymentAttempt,
        class_title: &str,
        student_name: &str,
        amount_cents: i64,
    ) {
        let ctx = ConfirmationContext {
            parent_name: attempt.parent_name.clone(),
            student_name: student_name.to_string(),
            class_title: class_title.to_string(),
            amount_cents,
            currency: attempt.currency.clone(),
        };

        let status = match self
            .notifier
            .send_payment_confirmation(&attempt.parent_email, &ctx)
            .await
        {
            Ok(()) => NotificationStatus::Sent,
            Err(e) => {
                tracing::warn!(
                    attempt_id = %attempt.id,
                    error = %e,
                    "Confirmation notification failed"
                );
                NotificationStatus::Failed
            }
        };

        if let Err(e) = self
            .notification_log
            .record(NotificationLog::new(
                NotificationChannel::Email,
                attempt.parent_email.clone(),
                "payment-confirmation",
                status,
                Utc::now(),
            ))
            .await
        {
            tracing::warn!(error = %e, "Failed to record notification log entry");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use classpay_core::{
        ClassSummary, MemoryAttemptStore, MemoryAuditLog, MemoryClassCatalog,
        MemoryNotificationLog, MemoryPartyDirectory, MemoryPaymentStore, MemoryRegistrationStore,
        PaymentStatus, StudentDescriptor, TracingNotifier,
    };
    use classpay_gateway::MockProviderClient;

    pub(crate) struct Harness {
        pub engine: Arc<ReconciliationEngine>,
        pub provider: Arc<MockProviderClient>,
        pub attempts: Arc<MemoryAttemptStore>,
        pub registrations: Arc<MemoryRegistrationStore>,
        pub payments: Arc<MemoryPaymentStore>,
        pub catalog: Arc<MemoryClassCatalog>,
        pub notification_log: Arc<MemoryNotificationLog>,
        pub audit: Arc<MemoryAuditLog>,
    }

    pub(crate) fn harness_with_notifier(notifier: Arc<dyn Notifier>) -> Harness {
        let provider = Arc::new(MockProviderClient::new());
        let attempts = Arc::new(MemoryAttemptStore::new());
        let registrations = Arc::new(MemoryRegistrationStore::new());
        let payments = Arc::new(MemoryPaymentStore::new());
        let directory = Arc::new(MemoryPartyDirectory::new());
        let catalog = Arc::new(MemoryClassCatalog::new());
        let notification_log = Arc::new(MemoryNotificationLog::new());
        let audit = Arc::new(MemoryAuditLog::new());

        let engine = Arc::new(ReconciliationEngine::new(
            provider.clone(),
            attempts.clone(),
            registrations.clone(),
            payments.clone(),
            directory,
            catalog.clone(),
            notifier,
            notification_log.clone(),
        ));

        Harness {
            engine,
            provider,
            attempts,
            registrations,
            payments,
            catalog,
            notification_log,
            audit,
        }
    }

    pub(crate) fn harness() -> Harness {
        harness_with_notifier(Arc::new(TracingNotifier))
    }

    pub(crate) fn class(capacity: u32) -> ClassSummary {
        ClassSummary {
            id: Uuid::new_v4(),
            title: "Robotics 101".into(),
            capacity,
            price_cents: 150_000,
            published: true,
            starts_at: Utc::now() + Duration::days(7),
        }
    }

    fn students(names: &[&str]) -> Vec<StudentDescriptor> {
        names
            .iter()
            .map(|n| StudentDescriptor {
                name: (*n).to_string(),
                age: None,
                school: None,
            })
            .collect()
    }

    pub(crate) async fn staged_attempt(
        h: &Harness,
        class_id: Uuid,
        names: &[&str],
        amount_cents: i64,
        reference: &str,
        status: VerifyStatus,
    ) -> PaymentAttempt {
        let attempt = PaymentAttempt::new(
            class_id,
            "Ada Obi",
            "ada@example.com",
            students(names),
            amount_cents,
            "NGN",
            "paystack",
        )
        .unwrap();
        let attempt = h.attempts.create(attempt).await.unwrap();
        let attempt = h
            .attempts
            .attach_provider_details(attempt.id, reference, "https://pay.example/x")
            .await
            .unwrap();
        h.provider.stage_verification(reference, status, amount_cents);
        attempt
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let h = harness();
        let class = class(5);
        h.catalog.insert(class.clone());
        staged_attempt(&h, class.id, &["Chidi"], 150_000, "cp_r1", VerifyStatus::Success).await;

        let first = h.engine.reconcile("cp_r1").await.unwrap();
        let ReconciliationOutcome::Completed(receipt) = &first else {
            panic!("expected Completed, got {:?}", first);
        };
        assert_eq!(receipt.registration_ids.len(), 1);

        for _ in 0..3 {
            let replay = h.engine.reconcile("cp_r1").await.unwrap();
            let ReconciliationOutcome::AlreadyCompleted(replayed) = &replay else {
                panic!("expected AlreadyCompleted, got {:?}", replay);
            };
            assert_eq!(replayed.registration_ids, receipt.registration_ids);
            assert_eq!(replayed.payment_ids, receipt.payment_ids);
        }

        assert_eq!(h.registrations.count_for_class(class.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_verification_leaves_attempt_pending() {
        let h = harness();
        let class = class(5);
        h.catalog.insert(class.clone());
        let attempt =
            staged_attempt(&h, class.id, &["Chidi"], 150_000, "cp_r2", VerifyStatus::Failed).await;

        let outcome = h.engine.reconcile("cp_r2").await.unwrap();
        assert!(matches!(
            outcome,
            ReconciliationOutcome::VerificationFailed { .. }
        ));

        let reread = h.attempts.get(attempt.id).await.unwrap().unwrap();
        assert_eq!(reread.status, AttemptStatus::Pending);
        assert_eq!(h.registrations.count_for_class(class.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_multi_student_split_sums_exactly() {
        let h = harness();
        let class = class(5);
        h.catalog.insert(class.clone());
        staged_attempt(
            &h,
            class.id,
            &["Chidi", "Ngozi", "Emeka"],
            1000,
            "cp_r3",
            VerifyStatus::Success,
        )
        .await;

        let outcome = h.engine.reconcile("cp_r3").await.unwrap();
        let ReconciliationOutcome::Completed(receipt) = outcome else {
            panic!("expected Completed");
        };
        assert_eq!(receipt.payment_ids.len(), 3);

        let mut amounts = Vec::new();
        for id in &receipt.payment_ids {
            amounts.push(h.payments.get(*id).await.unwrap().unwrap().amount_cents);
        }
        assert_eq!(amounts, vec![334, 333, 333]);
        assert_eq!(amounts.iter().sum::<i64>(), 1000);
    }

    #[tokio::test]
    async fn test_capacity_race_flags_manual_reconciliation() {
        let h = harness();
        let class = class(1);
        h.catalog.insert(class.clone());

        staged_attempt(&h, class.id, &["Chidi"], 150_000, "cp_w1", VerifyStatus::Success).await;
        let loser =
            staged_attempt(&h, class.id, &["Ngozi"], 150_000, "cp_w2", VerifyStatus::Success).await;

        let first = h.engine.reconcile("cp_w1").await.unwrap();
        assert!(matches!(first, ReconciliationOutcome::Completed(_)));

        let second = h.engine.reconcile("cp_w2").await.unwrap();
        assert!(matches!(
            second,
            ReconciliationOutcome::CapacityExceededPostPayment { .. }
        ));

        // Seat count never exceeds capacity; the losing attempt is annotated
        assert_eq!(h.registrations.count_for_class(class.id).await.unwrap(), 1);
        let reread = h.attempts.get(loser.id).await.unwrap().unwrap();
        assert!(reread.notes.unwrap().contains("manual reconciliation"));
    }

    #[tokio::test]
    async fn test_concurrent_reconciliations_respect_capacity() {
        let h = harness();
        let class = class(2);
        h.catalog.insert(class.clone());

        let mut references = Vec::new();
        for i in 0..5 {
            let reference = format!("cp_c{}", i);
            staged_attempt(
                &h,
                class.id,
                &["Student"],
                150_000,
                &reference,
                VerifyStatus::Success,
            )
            .await;
            references.push(reference);
        }

        let mut handles = Vec::new();
        for reference in references {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine.reconcile(&reference).await.unwrap()
            }));
        }

        let mut completed = 0;
        let mut capacity_exceeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ReconciliationOutcome::Completed(_) => completed += 1,
                ReconciliationOutcome::CapacityExceededPostPayment { .. } => capacity_exceeded += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(completed, 2);
        assert_eq!(capacity_exceeded, 3);
        assert_eq!(h.registrations.count_for_class(class.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_reconciliations_create_one_set() {
        let h = harness();
        let class = class(5);
        h.catalog.insert(class.clone());
        staged_attempt(&h, class.id, &["Chidi"], 150_000, "cp_dup", VerifyStatus::Success).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(
                async move { engine.reconcile("cp_dup").await.unwrap() },
            ));
        }

        let mut completed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ReconciliationOutcome::Completed(_) => completed += 1,
                ReconciliationOutcome::AlreadyCompleted(_) => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(completed, 1);
        assert_eq!(h.registrations.count_for_class(class.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_legacy_payment_path() {
        let h = harness();
        let registration = Registration::from_attempt(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        let mut registration = registration;
        registration.attempt_id = None;
        registration.payment_status = PaymentStatus::Pending;
        let registration = h
            .registrations
            .create_within_capacity(registration, 10)
            .await
            .unwrap();

        let mut payment = Payment::paid(
            registration.id,
            150_000,
            "NGN",
            "paystack",
            "cp_legacy",
            Utc::now(),
        );
        payment.status = PaymentStatus::Pending;
        payment.paid_at = None;
        let payment = h.payments.create(payment).await.unwrap();

        h.provider
            .stage_verification("cp_legacy", VerifyStatus::Success, 150_000);

        let outcome = h.engine.reconcile("cp_legacy").await.unwrap();
        let ReconciliationOutcome::LegacyPaymentPaid {
            payment_id,
            registration_id,
        } = outcome
        else {
            panic!("expected LegacyPaymentPaid");
        };
        assert_eq!(payment_id, payment.id);
        assert_eq!(registration_id, registration.id);

        let reread = h.payments.get(payment.id).await.unwrap().unwrap();
        assert_eq!(reread.status, PaymentStatus::Paid);
        assert!(reread.paid_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_reference() {
        let h = harness();
        h.provider
            .stage_verification("cp_ghost", VerifyStatus::Success, 150_000);
        let outcome = h.engine.reconcile("cp_ghost").await.unwrap();
        assert!(matches!(
            outcome,
            ReconciliationOutcome::UnknownReference { .. }
        ));
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send_payment_confirmation(
            &self,
            _to: &str,
            _ctx: &ConfirmationContext,
        ) -> Result<()> {
            Err(EngineError::Storage("smtp down".into()))
        }

        async fn send_payment_reminder(
            &self,
            _to: &str,
            _ctx: &classpay_core::ReminderContext,
        ) -> Result<()> {
            Err(EngineError::Storage("smtp down".into()))
        }
    }

    #[tokio::test]
    async fn test_notification_failure_never_unwinds_payment() {
        let h = harness_with_notifier(Arc::new(FailingNotifier));
        let class = class(5);
        h.catalog.insert(class.clone());
        staged_attempt(&h, class.id, &["Chidi"], 150_000, "cp_n1", VerifyStatus::Success).await;

        let outcome = h.engine.reconcile("cp_n1").await.unwrap();
        assert!(matches!(outcome, ReconciliationOutcome::Completed(_)));
        assert_eq!(h.registrations.count_for_class(class.id).await.unwrap(), 1);

        // The failed send still lands in the append-only log
        let entries = h.notification_log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, NotificationStatus::Failed);
    }
}
