//! Webhook Audit Log
//!
//! Every inbound webhook is recorded with its business outcome, including
//! processing errors. The ingress acknowledges receipt to the provider even
//! when reconciliation fails, so this log is the operator's trail for
//! follow-up on error-classified entries.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Business outcome of one webhook delivery
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookOutcome {
    /// Event was handled and reconciliation ran
    Processed,
    /// Event authenticated but carries no side effects for us
    Ignored,
    /// Event was handled but processing failed; needs operator follow-up
    Error(String),
}

/// One recorded webhook delivery
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub id: Uuid,
    pub event_type: String,
    pub reference: Option<String>,
    pub outcome: WebhookOutcome,
    pub received_at: DateTime<Utc>,
}

impl WebhookRecord {
    pub fn new(
        event_type: impl Into<String>,
        reference: Option<String>,
        outcome: WebhookOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            reference,
            outcome,
            received_at: Utc::now(),
        }
    }
}

/// Audit log collaborator
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_webhook(&self, record: WebhookRecord) -> Result<()>;
}

/// In-memory audit log (for development and tests)
pub struct MemoryAuditLog {
    records: RwLock<Vec<WebhookRecord>>,
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<WebhookRecord> {
        self.records.read().unwrap().clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record_webhook(&self, record: WebhookRecord) -> Result<()> {
        self.records.write().unwrap().push(record);
        Ok(())
    }
}
