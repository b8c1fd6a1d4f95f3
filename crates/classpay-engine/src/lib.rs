//! # classpay-engine
//!
//! The payment lifecycle engine: checkout-time attempt operations, the
//! reconciliation engine that converts confirmed payments into durable
//! records exactly once, the authenticated webhook ingress, and the
//! background scheduler.
//!
//! ## Flow
//!
//! ```text
//!  create attempt ──▶ initialize ──▶ parent pays (hosted page)
//!                                         │
//!                         webhook ────────┤──────── verify (pull)
//!                            │            ▼            │
//!                            └──▶ ReconciliationEngine ◀┘
//!                                         │
//!                          Parent + Student + Registration + Payment
//! ```
//!
//! Both confirmation paths, webhook push and verify pull, converge on
//! [`ReconciliationEngine::reconcile`]; a store-level completion claim keeps
//! the conversion idempotent under races between them.

pub mod attempts;
pub mod capacity;
pub mod ingress;
pub mod reconcile;
pub mod scheduler;

pub use attempts::{AttemptService, CreateAttemptRequest};
pub use capacity::CapacityGuard;
pub use ingress::{WebhookAck, WebhookIngress};
pub use reconcile::{ReconciliationEngine, ReconciliationOutcome, ReconciliationReceipt};
pub use scheduler::{Scheduler, SchedulerConfig};
