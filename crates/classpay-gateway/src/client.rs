//! Provider Client
//!
//! Pure translation layer to the external payment processor: initialize a
//! transaction, verify a transaction by reference. No business state lives
//! here. Verification is the canonical source of truth for payment status -
//! webhook payloads are never trusted for money-affecting decisions.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use classpay_core::{EngineError, Result};

use crate::config::ConfigResolver;

/// Request to initialize a hosted payment transaction
#[derive(Clone, Debug, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    pub amount_cents: i64,
    pub reference: String,
    pub callback_url: Option<String>,
    pub metadata: serde_json::Value,
}

/// Result of initializing a transaction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitializedTransaction {
    /// Hosted payment page to redirect the parent to
    pub authorization_url: String,
    pub reference: String,
}

/// Provider-reported transaction status
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyStatus {
    Success,
    Failed,
    Other(String),
}

impl VerifyStatus {
    fn from_provider(s: &str) -> Self {
        match s {
            "success" => VerifyStatus::Success,
            "failed" => VerifyStatus::Failed,
            other => VerifyStatus::Other(other.to_string()),
        }
    }
}

/// Result of verifying a transaction by reference
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifiedTransaction {
    pub reference: String,
    pub status: VerifyStatus,
    pub amount_cents: i64,
    pub customer_email: Option<String>,
}

/// Payment provider client trait
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Initialize a transaction and obtain the hosted payment URL
    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> Result<InitializedTransaction>;

    /// Verify a transaction by reference (read-only, safe to retry)
    async fn verify_transaction(&self, reference: &str) -> Result<VerifiedTransaction>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

#[derive(Deserialize)]
struct ProviderEnvelope<T> {
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    #[serde(default)]
    customer: Option<VerifyCustomer>,
}

#[derive(Deserialize)]
struct VerifyCustomer {
    #[serde(default)]
    email: Option<String>,
}

/// Provider client over HTTP
pub struct HttpProviderClient {
    http: reqwest::Client,
    resolve_config: ConfigResolver,
}

impl HttpProviderClient {
    /// Create a client with an injected configuration resolver
    pub fn new(resolve_config: ConfigResolver) -> Self {
        Self {
            http: reqwest::Client::new(),
            resolve_config,
        }
    }

    /// Map transport failures to the retry-safe taxonomy class
    fn transport_error(err: &reqwest::Error) -> EngineError {
        EngineError::ProviderUnavailable(err.to_string())
    }

    /// Classify a non-success HTTP status, surfacing the provider's message
    async fn classify_response_error(response: reqwest::Response) -> EngineError {
        let status = response.status();
        let message = response
            .json::<ProviderEnvelope<serde_json::Value>>()
            .await
            .ok()
            .and_then(|e| e.message)
            .unwrap_or_else(|| format!("HTTP {}", status));

        if status.is_client_error() {
            EngineError::ProviderRejected(message)
        } else {
            EngineError::ProviderUnavailable(message)
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> Result<InitializedTransaction> {
        let config = (self.resolve_config)()?;

        let callback_url = request
            .callback_url
            .clone()
            .or_else(|| config.callback_url.clone());

        let body = serde_json::json!({
            "email": request.email,
            "amount": request.amount_cents,
            "reference": request.reference,
            "callback_url": callback_url,
            "metadata": request.metadata,
        });

        let response = self
            .http
            .post(format!("{}/transaction/initialize", config.base_url))
            .bearer_auth(&config.secret_key)
            .timeout(Duration::from_secs(config.timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::classify_response_error(response).await);
        }

        let envelope: ProviderEnvelope<InitializeData> = response
            .json()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        let data = envelope.data.ok_or_else(|| {
            EngineError::ProviderUnavailable("initialize response missing data".into())
        })?;

        tracing::info!(
            reference = %data.reference,
            "Provider transaction initialized"
        );

        Ok(InitializedTransaction {
            authorization_url: data.authorization_url,
            reference: data.reference,
        })
    }

    async fn verify_transaction(&self, reference: &str) -> Result<VerifiedTransaction> {
        let config = (self.resolve_config)()?;

        let response = self
            .http
            .get(format!(
                "{}/transaction/verify/{}",
                config.base_url, reference
            ))
            .bearer_auth(&config.secret_key)
            .timeout(Duration::from_secs(config.timeout_secs))
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::classify_response_error(response).await);
        }

        let envelope: ProviderEnvelope<VerifyData> = response
            .json()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        let data = envelope.data.ok_or_else(|| {
            EngineError::ProviderUnavailable("verify response missing data".into())
        })?;

        Ok(VerifiedTransaction {
            reference: reference.to_string(),
            status: VerifyStatus::from_provider(&data.status),
            amount_cents: data.amount,
            customer_email: data.customer.and_then(|c| c.email),
        })
    }
}

// ============================================================================
// Mock implementation
// ============================================================================

/// Mock provider client (for development and tests).
///
/// Transactions verify as `Other("pending")` until a verification is staged
/// with [`MockProviderClient::stage_verification`].
pub struct MockProviderClient {
    verifications: RwLock<HashMap<String, VerifiedTransaction>>,
}

impl Default for MockProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProviderClient {
    pub fn new() -> Self {
        Self {
            verifications: RwLock::new(HashMap::new()),
        }
    }

    /// Stage the verification result the provider will report for a reference
    pub fn stage_verification(&self, reference: &str, status: VerifyStatus, amount_cents: i64) {
        self.verifications.write().unwrap().insert(
            reference.to_string(),
            VerifiedTransaction {
                reference: reference.to_string(),
                status,
                amount_cents,
                customer_email: None,
            },
        );
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> Result<InitializedTransaction> {
        Ok(InitializedTransaction {
            authorization_url: format!("https://pay.example/{}", request.reference),
            reference: request.reference.clone(),
        })
    }

    async fn verify_transaction(&self, reference: &str) -> Result<VerifiedTransaction> {
        let staged = self.verifications.read().unwrap().get(reference).cloned();
        Ok(staged.unwrap_or_else(|| VerifiedTransaction {
            reference: reference.to_string(),
            status: VerifyStatus::Other("pending".into()),
            amount_cents: 0,
            customer_email: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(VerifyStatus::from_provider("success"), VerifyStatus::Success);
        assert_eq!(VerifyStatus::from_provider("failed"), VerifyStatus::Failed);
        assert_eq!(
            VerifyStatus::from_provider("abandoned"),
            VerifyStatus::Other("abandoned".into())
        );
    }

    #[tokio::test]
    async fn test_mock_stages_verifications() {
        let mock = MockProviderClient::new();

        let pending = mock.verify_transaction("cp_ref").await.unwrap();
        assert_eq!(pending.status, VerifyStatus::Other("pending".into()));

        mock.stage_verification("cp_ref", VerifyStatus::Success, 150_000);
        let verified = mock.verify_transaction("cp_ref").await.unwrap();
        assert_eq!(verified.status, VerifyStatus::Success);
        assert_eq!(verified.amount_cents, 150_000);
    }

    #[tokio::test]
    async fn test_mock_initialize_echoes_reference() {
        let mock = MockProviderClient::new();
        let init = mock
            .initialize_transaction(&InitializeRequest {
                email: "ada@example.com".into(),
                amount_cents: 150_000,
                reference: "cp_abc".into(),
                callback_url: None,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert_eq!(init.reference, "cp_abc");
        assert!(init.authorization_url.contains("cp_abc"));
    }
}
