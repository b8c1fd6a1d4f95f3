//! HTTP Handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use classpay_core::{EngineError, PaymentAttempt};
use classpay_engine::{CreateAttemptRequest, ReconciliationOutcome, WebhookAck};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct InitializeResponse {
    pub authorization_url: String,
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct NotesRequest {
    pub notes: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map the error taxonomy to an HTTP status and `{error, code}` body
fn api_error(e: &EngineError) -> ApiError {
    let status = match e {
        EngineError::ClassNotFound(_) | EngineError::AttemptNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::ClassNotPublished(_)
        | EngineError::ClassFull(_)
        | EngineError::InvalidTransition { .. }
        | EngineError::DuplicateReference(_) => StatusCode::CONFLICT,
        EngineError::InvalidCheckout(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Authentication(_) => StatusCode::BAD_REQUEST,
        EngineError::ProviderRejected(_) | EngineError::ProviderUnavailable(_) => {
            StatusCode::BAD_GATEWAY
        }
        EngineError::Configuration(_) | EngineError::Storage(_) | EngineError::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: e.user_message(),
            code: e.code().into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider_configured: state.provider_configured,
    })
}

/// Start a checkout: create a PENDING payment attempt
pub async fn create_attempt(
    State(state): State<AppState>,
    Json(payload): Json<CreateAttemptRequest>,
) -> Result<(StatusCode, Json<PaymentAttempt>), ApiError> {
    let attempt = state
        .attempts
        .create_attempt(payload)
        .await
        .map_err(|e| api_error(&e))?;
    Ok((StatusCode::CREATED, Json(attempt)))
}

/// Initialize the hosted payment for an attempt
pub async fn initialize_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InitializeResponse>, ApiError> {
    let initialized = state
        .attempts
        .initialize_payment(id)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(InitializeResponse {
        authorization_url: initialized.authorization_url,
        reference: initialized.reference,
    }))
}

/// Client-triggered verification of a payment by provider reference.
///
/// The callback page calls this after the parent returns from the hosted
/// payment; it races the webhook and either one may complete the attempt.
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<ReconciliationOutcome>, ApiError> {
    let outcome = state
        .engine
        .reconcile(&reference)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(outcome))
}

/// Provider webhook endpoint.
///
/// The body must stay raw bytes for signature verification. 400 is returned
/// only for a missing or invalid signature; every authenticated delivery is
/// acknowledged with 200 regardless of the business outcome.
pub async fn provider_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get("x-provider-signature")
        .and_then(|v| v.to_str().ok());

    let ack = state
        .ingress
        .handle(&body, signature)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(ack))
}

/// Operator action: cancel a pending attempt
pub async fn cancel_attempt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentAttempt>, ApiError> {
    let attempt = state.attempts.cancel(id).await.map_err(|e| api_error(&e))?;
    Ok(Json(attempt))
}

/// Operator action: replace the notes on an attempt
pub async fn update_notes(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<NotesRequest>,
) -> Result<Json<PaymentAttempt>, ApiError> {
    let attempt = state
        .attempts
        .update_notes(id, &payload.notes)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(attempt))
}
