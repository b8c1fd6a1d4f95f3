//! Notifications
//!
//! The `Notifier` collaborator sends confirmation and reminder messages; the
//! `NotificationLog` is the append-only record of every outbound attempt.
//! The scheduler reads the log to dedupe reminders - a reminder is suppressed
//! only when a prior SENT entry exists for the same recipient and template
//! key within the dedupe window.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Outbound channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationChannel {
    Email,
    Sms,
}

/// Delivery outcome of one send attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Sent,
    Failed,
}

/// One row in the append-only notification log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: Uuid,
    pub channel: NotificationChannel,
    pub to_address: String,
    pub template_key: String,
    pub status: NotificationStatus,
    pub sent_at: DateTime<Utc>,
}

impl NotificationLog {
    pub fn new(
        channel: NotificationChannel,
        to_address: impl Into<String>,
        template_key: impl Into<String>,
        status: NotificationStatus,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            to_address: to_address.into(),
            template_key: template_key.into(),
            status,
            sent_at,
        }
    }
}

/// Notification log storage
#[async_trait]
pub trait NotificationLogStore: Send + Sync {
    /// Append one log entry
    async fn record(&self, entry: NotificationLog) -> Result<()>;

    /// Whether a SENT entry exists for (to, template_key) within the window
    /// ending at `now`
    async fn sent_within(
        &self,
        to_address: &str,
        template_key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// In-memory notification log (for development and tests)
pub struct MemoryNotificationLog {
    entries: RwLock<Vec<NotificationLog>>,
}

impl Default for MemoryNotificationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNotificationLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<NotificationLog> {
        self.entries.read().unwrap().clone()
    }
}

#[async_trait]
impl NotificationLogStore for MemoryNotificationLog {
    async fn record(&self, entry: NotificationLog) -> Result<()> {
        self.entries.write().unwrap().push(entry);
        Ok(())
    }

    async fn sent_within(
        &self,
        to_address: &str,
        template_key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let cutoff = now - window;
        let entries = self.entries.read().unwrap();
        Ok(entries.iter().any(|e| {
            e.status == NotificationStatus::Sent
                && e.to_address == to_address
                && e.template_key == template_key
                && e.sent_at >= cutoff
        }))
    }
}

/// Context for a payment confirmation message
#[derive(Clone, Debug)]
pub struct ConfirmationContext {
    pub parent_name: String,
    pub student_name: String,
    pub class_title: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// Context for a payment or class reminder message
#[derive(Clone, Debug)]
pub struct ReminderContext {
    pub parent_name: String,
    pub class_title: String,
    pub template_key: String,
}

/// Notification dispatcher collaborator.
///
/// Failures here must never unwind a successful payment reconciliation -
/// callers log the failure and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_payment_confirmation(&self, to: &str, ctx: &ConfirmationContext) -> Result<()>;

    async fn send_payment_reminder(&self, to: &str, ctx: &ReminderContext) -> Result<()>;
}

/// Notifier that only logs (for development and tests)
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send_payment_confirmation(&self, to: &str, ctx: &ConfirmationContext) -> Result<()> {
        tracing::info!(
            to = %to,
            student = %ctx.student_name,
            class = %ctx.class_title,
            amount_cents = ctx.amount_cents,
            "Payment confirmation dispatched"
        );
        Ok(())
    }

    async fn send_payment_reminder(&self, to: &str, ctx: &ReminderContext) -> Result<()> {
        tracing::info!(
            to = %to,
            template = %ctx.template_key,
            class = %ctx.class_title,
            "Payment reminder dispatched"
        );
        Ok(())
    }
}
