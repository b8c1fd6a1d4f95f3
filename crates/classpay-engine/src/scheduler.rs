//! Background Scheduler
//!
//! One long-lived task running two fixed-interval sweeps:
//!
//! - **Expiry sweep** - transitions PENDING attempts past their TTL to
//!   EXPIRED. Idempotent and order-independent, so a missed or repeated
//!   cycle is harmless.
//! - **Reminder sweep** - dispatches payment reminders for unpaid
//!   registrations and stale pending attempts at configured day marks, and
//!   class reminders at configured hour offsets before start. Every
//!   dispatch is deduped against the notification log first.
//!
//! The sweeps never create registrations; they run safely concurrent with
//! reconciliation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use classpay_core::{
    AttemptStore, ClassCatalog, ClassSummary, NotificationChannel, NotificationLog,
    NotificationLogStore, NotificationStatus, Notifier, PartyDirectory, RegistrationStore,
    ReminderContext, Result,
};

/// Scheduler intervals and reminder marks
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Seconds between expiry sweeps
    pub expiry_interval_secs: u64,

    /// Seconds between reminder sweeps
    pub reminder_interval_secs: u64,

    /// Whole-day marks after creation at which payment reminders fire
    pub payment_reminder_days: Vec<i64>,

    /// Hour offsets before class start at which class reminders fire
    pub class_reminder_hours: Vec<i64>,

    /// Dedupe window for day-mark reminders. Shorter than a day so a mark
    /// fires once even when sweeps run hourly.
    pub payment_dedupe_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            expiry_interval_secs: 300,
            reminder_interval_secs: 3600,
            payment_reminder_days: vec![1, 3, 7],
            class_reminder_hours: vec![24, 48],
            payment_dedupe_hours: 20,
        }
    }
}

impl SchedulerConfig {
    /// Resolve from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            expiry_interval_secs: env_u64("CLASSPAY_EXPIRY_INTERVAL_SECS")
                .unwrap_or(defaults.expiry_interval_secs),
            reminder_interval_secs: env_u64("CLASSPAY_REMINDER_INTERVAL_SECS")
                .unwrap_or(defaults.reminder_interval_secs),
            payment_reminder_days: env_i64_list("CLASSPAY_PAYMENT_REMINDER_DAYS")
                .unwrap_or(defaults.payment_reminder_days),
            class_reminder_hours: env_i64_list("CLASSPAY_CLASS_REMINDER_HOURS")
                .unwrap_or(defaults.class_reminder_hours),
            payment_dedupe_hours: defaults.payment_dedupe_hours,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_i64_list(key: &str) -> Option<Vec<i64>> {
    let raw = std::env::var(key).ok()?;
    let values: Vec<i64> = raw
        .split(',')
        .filter_map(|v| v.trim().parse().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Expiry and reminder sweeps over the attempt and registration stores
pub struct Scheduler {
    config: SchedulerConfig,
    attempts: Arc<dyn AttemptStore>,
    registrations: Arc<dyn RegistrationStore>,
    directory: Arc<dyn PartyDirectory>,
    catalog: Arc<dyn ClassCatalog>,
    notifier: Arc<dyn Notifier>,
    notification_log: Arc<dyn NotificationLogStore>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        attempts: Arc<dyn AttemptStore>,
        registrations: Arc<dyn RegistrationStore>,
        directory: Arc<dyn PartyDirectory>,
        catalog: Arc<dyn ClassCatalog>,
        notifier: Arc<dyn Notifier>,
        notification_log: Arc<dyn NotificationLogStore>,
    ) -> Self {
        Self {
            config,
            attempts,
            registrations,
            directory,
            catalog,
            notifier,
            notification_log,
        }
    }

    /// Run both sweep loops until the shutdown channel flips
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut expiry = tokio::time::interval(std::time::Duration::from_secs(
            self.config.expiry_interval_secs,
        ));
        let mut reminders = tokio::time::interval(std::time::Duration::from_secs(
            self.config.reminder_interval_secs,
        ));

        tracing::info!(
            expiry_interval_secs = self.config.expiry_interval_secs,
            reminder_interval_secs = self.config.reminder_interval_secs,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = expiry.tick() => {
                    if let Err(e) = self.expiry_sweep(Utc::now()).await {
                        tracing::error!(error = %e, "Expiry sweep failed");
                    }
                }
                _ = reminders.tick() => {
                    if let Err(e) = self.reminder_sweep(Utc::now()).await {
                        tracing::error!(error = %e, "Reminder sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Transition PENDING attempts past their TTL to EXPIRED
    pub async fn expiry_sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.attempts.expire_pending_before(now).await?;
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired stale payment attempts");
        }
        Ok(expired.len())
    }

    /// Dispatch due payment and class reminders, deduped via the
    /// notification log. Returns the number of dispatches attempted.
    pub async fn reminder_sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut dispatched = 0;
        dispatched += self.remind_unpaid_registrations(now).await?;
        dispatched += self.remind_pending_attempts(now).await?;
        dispatched += self.remind_upcoming_classes(now).await?;
        if dispatched > 0 {
            tracing::info!(count = dispatched, "Reminder sweep dispatched");
        }
        Ok(dispatched)
    }

    /// Day mark matched by an age, if any
    fn day_mark(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<i64> {
        let elapsed_days = (now - created_at).num_days();
        self.config
            .payment_reminder_days
            .iter()
            .copied()
            .find(|mark| *mark == elapsed_days)
    }

    async fn remind_unpaid_registrations(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut dispatched = 0;
        for registration in self.registrations.list_unpaid().await? {
            let Some(mark) = self.day_mark(registration.created_at, now) else {
                continue;
            };
            let Some(parent) = self.directory.find_parent(registration.parent_id).await? else {
                continue;
            };
            let Some(class) = self.catalog.find_class(registration.class_id).await? else {
                continue;
            };

            let template_key = format!("payment-reminder-day-{}", mark);
            let window = Duration::hours(self.config.payment_dedupe_hours);
            if self
                .notification_log
                .sent_within(&parent.email, &template_key, window, now)
                .await?
            {
                continue;
            }

            self.dispatch(&parent.email, &parent.name, &class.title, &template_key, now)
                .await;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    async fn remind_pending_attempts(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut dispatched = 0;
        for attempt in self.attempts.list_pending().await? {
            let Some(mark) = self.day_mark(attempt.created_at, now) else {
                continue;
            };
            let Some(class) = self.catalog.find_class(attempt.class_id).await? else {
                continue;
            };

            let template_key = format!("payment-reminder-day-{}", mark);
            let window = Duration::hours(self.config.payment_dedupe_hours);
            if self
                .notification_log
                .sent_within(&attempt.parent_email, &template_key, window, now)
                .await?
            {
                continue;
            }

            self.dispatch(
                &attempt.parent_email,
                &attempt.parent_name,
                &class.title,
                &template_key,
                now,
            )
            .await;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Nearest hour mark a class start currently falls under, if any
    fn hour_mark(&self, class: &ClassSummary, now: DateTime<Utc>) -> Option<i64> {
        let to_start = class.starts_at - now;
        if to_start <= Duration::zero() {
            return None;
        }
        let mut marks = self.config.class_reminder_hours.clone();
        marks.sort_unstable();
        marks
            .into_iter()
            .find(|mark| to_start <= Duration::hours(*mark))
    }

    async fn remind_upcoming_classes(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut dispatched = 0;
        for registration in self.registrations.list_all().await? {
            let Some(class) = self.catalog.find_class(registration.class_id).await? else {
                continue;
            };
            let Some(mark) = self.hour_mark(&class, now) else {
                continue;
            };
            let Some(parent) = self.directory.find_parent(registration.parent_id).await? else {
                continue;
            };

            // The dedupe window spans the whole mark so a reminder fires at
            // most once per mark even across many sweeps.
            let template_key = format!("class-reminder-hour-{}", mark);
            let window = Duration::hours(mark);
            if self
                .notification_log
                .sent_within(&parent.email, &template_key, window, now)
                .await?
            {
                continue;
            }

            self.dispatch(&parent.email, &parent.name, &class.title, &template_key, now)
                .await;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Best-effort send; the outcome lands in the log either way
    async fn dispatch(
        &self,
        to: &str,
        parent_name: &str,
        class_title: &str,
        template_key: &str,
        now: DateTime<Utc>,
    ) {
        let ctx = ReminderContext {
            parent_name: parent_name.to_string(),
            class_title: class_title.to_string(),
            template_key: template_key.to_string(),
        };

        let status = match self.notifier.send_payment_reminder(to, &ctx).await {
            Ok(()) => NotificationStatus::Sent,
            Err(e) => {
                tracing::warn!(to = %to, template = %template_key, error = %e, "Reminder send failed");
                NotificationStatus::Failed
            }
        };

        if let Err(e) = self
            .notification_log
            .record(NotificationLog::new(
                NotificationChannel::Email,
                to,
                template_key,
                status,
                now,
            ))
            .await
        {
            tracing::warn!(error = %e, "Failed to record notification log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classpay_core::{
        AttemptStatus, MemoryAttemptStore, MemoryClassCatalog, MemoryNotificationLog,
        MemoryPartyDirectory, MemoryRegistrationStore, ParentProfile, PaymentAttempt,
        PaymentStatus, Registration, StudentDescriptor, TracingNotifier,
    };
    use uuid::Uuid;

    struct Harness {
        scheduler: Scheduler,
        attempts: Arc<MemoryAttemptStore>,
        registrations: Arc<MemoryRegistrationStore>,
        directory: Arc<MemoryPartyDirectory>,
        catalog: Arc<MemoryClassCatalog>,
        notification_log: Arc<MemoryNotificationLog>,
    }

    fn harness() -> Harness {
        let attempts = Arc::new(MemoryAttemptStore::new());
        let registrations = Arc::new(MemoryRegistrationStore::new());
        let directory = Arc::new(MemoryPartyDirectory::new());
        let catalog = Arc::new(MemoryClassCatalog::new());
        let notification_log = Arc::new(MemoryNotificationLog::new());

        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            attempts.clone(),
            registrations.clone(),
            directory.clone(),
            catalog.clone(),
            Arc::new(TracingNotifier),
            notification_log.clone(),
        );

        Harness {
            scheduler,
            attempts,
            registrations,
            directory,
            catalog,
            notification_log,
        }
    }

    fn class(starts_in: Duration) -> classpay_core::ClassSummary {
        classpay_core::ClassSummary {
            id: Uuid::new_v4(),
            title: "Robotics 101".into(),
            capacity: 10,
            price_cents: 150_000,
            published: true,
            starts_at: Utc::now() + starts_in,
        }
    }

    fn attempt(class_id: Uuid, age: Duration) -> PaymentAttempt {
        let mut a = PaymentAttempt::new(
            class_id,
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
        .unwrap();
        a.created_at = Utc::now() - age;
        a.expires_at = Utc::now() + Duration::days(30);
        a
    }

    #[tokio::test]
    async fn test_expiry_sweep_expires_stale_attempts_only() {
        let h = harness();
        let class = class(Duration::days(7));
        h.catalog.insert(class.clone());

        let mut stale = attempt(class.id, Duration::hours(30));
        stale.expires_at = Utc::now() - Duration::hours(6);
        let stale = h.attempts.create(stale).await.unwrap();
        let fresh = h.attempts.create(attempt(class.id, Duration::hours(1))).await.unwrap();

        assert_eq!(h.scheduler.expiry_sweep(Utc::now()).await.unwrap(), 1);
        assert_eq!(h.scheduler.expiry_sweep(Utc::now()).await.unwrap(), 0);

        assert_eq!(
            h.attempts.get(stale.id).await.unwrap().unwrap().status,
            AttemptStatus::Expired
        );
        assert_eq!(
            h.attempts.get(fresh.id).await.unwrap().unwrap().status,
            AttemptStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_pending_attempt_reminder_fires_once_per_mark() {
        let h = harness();
        let class = class(Duration::days(30));
        h.catalog.insert(class.clone());
        h.attempts
            .create(attempt(class.id, Duration::days(3) + Duration::hours(2)))
            .await
            .unwrap();

        let now = Utc::now();
        assert_eq!(h.scheduler.reminder_sweep(now).await.unwrap(), 1);
        // Second sweep within the dedupe window dispatches nothing
        assert_eq!(h.scheduler.reminder_sweep(now + Duration::hours(1)).await.unwrap(), 0);

        let entries = h.notification_log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].template_key, "payment-reminder-day-3");
        assert_eq!(entries[0].to_address, "ada@example.com");
    }

    #[tokio::test]
    async fn test_attempt_outside_day_marks_is_skipped() {
        let h = harness();
        let class = class(Duration::days(30));
        h.catalog.insert(class.clone());
        h.attempts
            .create(attempt(class.id, Duration::days(2)))
            .await
            .unwrap();

        assert_eq!(h.scheduler.reminder_sweep(Utc::now()).await.unwrap(), 0);
        assert!(h.notification_log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_unpaid_registration_reminder() {
        let h = harness();
        let class = class(Duration::days(30));
        h.catalog.insert(class.clone());

        let parent = h
            .directory
            .find_or_create_parent(
                "obi@example.com",
                &ParentProfile {
                    name: "Obi Eze".into(),
                    phone: None,
                    city: None,
                },
            )
            .await
            .unwrap();

        let mut registration =
            Registration::from_attempt(class.id, parent.id, Uuid::new_v4(), Uuid::new_v4());
        registration.payment_status = PaymentStatus::Pending;
        registration.created_at = Utc::now() - Duration::days(1) - Duration::hours(1);
        h.registrations
            .create_within_capacity(registration, 10)
            .await
            .unwrap();

        assert_eq!(h.scheduler.reminder_sweep(Utc::now()).await.unwrap(), 1);
        let entries = h.notification_log.entries();
        assert_eq!(entries[0].template_key, "payment-reminder-day-1");
        assert_eq!(entries[0].to_address, "obi@example.com");
    }

    #[tokio::test]
    async fn test_class_reminder_nearest_mark_with_dedupe() {
        let h = harness();
        let class = class(Duration::hours(20));
        h.catalog.insert(class.clone());

        let parent = h
            .directory
            .find_or_create_parent(
                "ada@example.com",
                &ParentProfile {
                    name: "Ada Obi".into(),
                    phone: None,
                    city: None,
                },
            )
            .await
            .unwrap();

        let registration =
            Registration::from_attempt(class.id, parent.id, Uuid::new_v4(), Uuid::new_v4());
        h.registrations
            .create_within_capacity(registration, 10)
            .await
            .unwrap();

        let now = Utc::now();
        assert_eq!(h.scheduler.reminder_sweep(now).await.unwrap(), 1);
        assert_eq!(h.scheduler.reminder_sweep(now + Duration::hours(2)).await.unwrap(), 0);

        // Nearest mark only: 20 hours out matches the 24 hour mark, not 48
        let entries = h.notification_log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].template_key, "class-reminder-hour-24");
    }

    #[tokio::test]
    async fn test_started_class_gets_no_reminder() {
        let h = harness();
        let class = class(Duration::hours(-1));
        h.catalog.insert(class.clone());

        let parent = h
            .directory
            .find_or_create_parent(
                "ada@example.com",
                &ParentProfile {
                    name: "Ada Obi".into(),
                    phone: None,
                    city: None,
                },
            )
            .await
            .unwrap();
        let registration =
            Registration::from_attempt(class.id, parent.id, Uuid::new_v4(), Uuid::new_v4());
        h.registrations
            .create_within_capacity(registration, 10)
            .await
            .unwrap();

        assert_eq!(h.scheduler.reminder_sweep(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let h = harness();
        let scheduler = Arc::new(h.scheduler);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler.run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
