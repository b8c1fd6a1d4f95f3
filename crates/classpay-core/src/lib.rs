//! # classpay-core
//!
//! Domain entities, state machine, stores, and error taxonomy for the
//! classpay registration payment engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Engine crates                          │
//! │  ┌──────────────┐  ┌───────────────┐  ┌───────────────────┐  │
//! │  │ PaymentAttempt│  │ Registration │  │  Collaborators    │  │
//! │  │ state machine │──│  + Payment   │──│  (Catalog, Party, │  │
//! │  │  + stores     │  │   stores     │  │  Notifier, Audit) │  │
//! │  └──────────────┘  └───────────────┘  └───────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The collaborator traits keep parent/student/class CRUD, email/SMS
//! delivery, and audit storage outside the engine; in-memory implementations
//! back development mode and tests.

pub mod attempt;
pub mod audit;
pub mod catalog;
pub mod directory;
pub mod error;
pub mod notify;
pub mod registration;
pub mod store;

pub use attempt::{AttemptStatus, PaymentAttempt, StudentDescriptor};
pub use audit::{AuditLog, MemoryAuditLog, WebhookOutcome, WebhookRecord};
pub use catalog::{ClassCatalog, ClassSummary, MemoryClassCatalog};
pub use directory::{MemoryPartyDirectory, ParentProfile, PartyDirectory};
pub use error::{EngineError, Result};
pub use notify::{
    ConfirmationContext, MemoryNotificationLog, NotificationChannel, NotificationLog,
    NotificationLogStore, NotificationStatus, Notifier, ReminderContext, TracingNotifier,
};
pub use registration::{
    split_amount_cents, AttendanceStatus, Parent, Payment, PaymentStatus, Registration,
    RegistrationSource, Student,
};
pub use store::{
    AttemptStore, ClaimOutcome, MemoryAttemptStore, MemoryPaymentStore, MemoryRegistrationStore,
    PaymentStore, RegistrationStore,
};
