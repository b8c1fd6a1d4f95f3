//! Provider Configuration
//!
//! Configuration is resolved through an injected resolver function once per
//! gateway operation and passed explicitly - never read as ambient global
//! state. This lets deployments back it with a settings store while tests
//! and development mode use fixed values or the environment.

use std::sync::Arc;

use classpay_core::{EngineError, Result};

/// Default provider API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Resolved provider credentials and endpoints
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// API secret key (Bearer token)
    pub secret_key: String,

    /// Shared secret for webhook signature verification
    pub webhook_secret: String,

    /// Provider API base URL
    pub base_url: String,

    /// Redirect URL after hosted payment, passed on initialization
    pub callback_url: Option<String>,

    /// Currency for new attempts when the request does not specify one
    pub default_currency: String,

    /// Network timeout for provider calls
    pub timeout_secs: u64,
}

impl ProviderConfig {
    /// Resolve from environment variables.
    ///
    /// Fails with a `Configuration` error when credentials are absent -
    /// fatal to the operation, never retried automatically.
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("CLASSPAY_PROVIDER_SECRET_KEY")
            .map_err(|_| EngineError::Configuration("CLASSPAY_PROVIDER_SECRET_KEY not set".into()))?;
        let webhook_secret = std::env::var("CLASSPAY_PROVIDER_WEBHOOK_SECRET")
            .map_err(|_| EngineError::Configuration("CLASSPAY_PROVIDER_WEBHOOK_SECRET not set".into()))?;

        Ok(Self {
            secret_key,
            webhook_secret,
            base_url: std::env::var("CLASSPAY_PROVIDER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
            callback_url: std::env::var("CLASSPAY_CALLBACK_URL").ok(),
            default_currency: std::env::var("CLASSPAY_CURRENCY")
                .unwrap_or_else(|_| "NGN".into()),
            timeout_secs: std::env::var("CLASSPAY_PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Fixed configuration (for development and tests)
    pub fn fixed(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            base_url: DEFAULT_BASE_URL.into(),
            callback_url: None,
            default_currency: "NGN".into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Configuration resolution function, invoked once per gateway operation
pub type ConfigResolver = Arc<dyn Fn() -> Result<ProviderConfig> + Send + Sync>;

/// Resolver backed by environment variables
pub fn env_resolver() -> ConfigResolver {
    Arc::new(ProviderConfig::from_env)
}

/// Resolver returning a fixed configuration
pub fn fixed_resolver(config: ProviderConfig) -> ConfigResolver {
    Arc::new(move || Ok(config.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_resolver_resolves_per_call() {
        let resolver = fixed_resolver(ProviderConfig::fixed("sk_test", "whsec_test"));
        let config = resolver().unwrap();
        assert_eq!(config.secret_key, "sk_test");
        assert_eq!(config.default_currency, "NGN");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }
}
