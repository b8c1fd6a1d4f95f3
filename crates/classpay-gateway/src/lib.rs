//! # classpay-gateway
//!
//! Payment provider gateway for classpay.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌─────────────┐
//! │  classpay   │────▶│  Provider Hosted │────▶│  classpay   │
//! │ (initialize)│     │  Payment Page    │     │  (verify /  │
//! │             │     │                  │     │   webhook)  │
//! └─────────────┘     └─────────────────┘     └─────────────┘
//! ```
//!
//! Three operations, no business state:
//! - `initialize_transaction` - start a hosted payment, get a redirect URL.
//! - `verify_transaction` - pull-based confirmation, the canonical source
//!   of truth for payment status.
//! - `authenticate_webhook` - HMAC-SHA512 over the raw body with a shared
//!   secret, constant-time comparison.
//!
//! Configuration is resolved per operation through an injected
//! [`ConfigResolver`], never read as ambient global state.

mod client;
mod config;
mod webhook;

pub use client::{
    HttpProviderClient, InitializeRequest, InitializedTransaction, MockProviderClient,
    ProviderClient, VerifiedTransaction, VerifyStatus,
};
pub use config::{env_resolver, fixed_resolver, ConfigResolver, ProviderConfig};
pub use webhook::{authenticate_webhook, sign_body, WebhookEvent};
