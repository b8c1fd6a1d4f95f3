//! classpay HTTP Server
//!
//! Axum-based server exposing the checkout, verification, webhook, and
//! operator endpoints, with the background scheduler running alongside.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{Duration, Utc};
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classpay_core::{
    ClassSummary, MemoryAttemptStore, MemoryAuditLog, MemoryClassCatalog, MemoryNotificationLog,
    MemoryPartyDirectory, MemoryPaymentStore, MemoryRegistrationStore, TracingNotifier,
};
use classpay_gateway::{env_resolver, HttpProviderClient, MockProviderClient, ProviderClient};
use classpay_engine::{
    AttemptService, CapacityGuard, ReconciliationEngine, Scheduler, SchedulerConfig,
    WebhookIngress,
};

use crate::handlers::{
    cancel_attempt, create_attempt, health_check, initialize_payment, provider_webhook,
    update_notes, verify_payment,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    // Stores and collaborators
    let attempts = Arc::new(MemoryAttemptStore::new());
    let registrations = Arc::new(MemoryRegistrationStore::new());
    let payments = Arc::new(MemoryPaymentStore::new());
    let directory = Arc::new(MemoryPartyDirectory::new());
    let catalog = Arc::new(MemoryClassCatalog::new());
    let notifier = Arc::new(TracingNotifier);
    let notification_log = Arc::new(MemoryNotificationLog::new());
    let audit = Arc::new(MemoryAuditLog::new());

    // Provider client: real HTTP when credentials are present, mock otherwise
    let provider_configured = std::env::var("CLASSPAY_PROVIDER_SECRET_KEY").is_ok();
    let provider: Arc<dyn ProviderClient> = if provider_configured {
        tracing::info!("✓ Payment provider configured");
        Arc::new(HttpProviderClient::new(env_resolver()))
    } else {
        tracing::warn!("⚠ Provider credentials not set - using mock provider");
        tracing::warn!("  Set CLASSPAY_PROVIDER_SECRET_KEY and CLASSPAY_PROVIDER_WEBHOOK_SECRET in .env");
        Arc::new(MockProviderClient::new())
    };

    // Development mode: seed a demo class so the API is exercisable
    if !provider_configured {
        let demo = ClassSummary {
            id: uuid::Uuid::new_v4(),
            title: "Robotics 101 (demo)".into(),
            capacity: 20,
            price_cents: 150_000,
            published: true,
            starts_at: Utc::now() + Duration::days(7),
        };
        tracing::info!(class_id = %demo.id, "Seeded demo class");
        catalog.insert(demo);
    }

    // Engine wiring
    let guard = CapacityGuard::new(catalog.clone(), registrations.clone());
    let attempt_service = AttemptService::new(
        attempts.clone(),
        catalog.clone(),
        guard,
        provider.clone(),
    );
    let engine = Arc::new(ReconciliationEngine::new(
        provider,
        attempts.clone(),
        registrations.clone(),
        payments,
        directory.clone(),
        catalog.clone(),
        notifier.clone(),
        notification_log.clone(),
    ));
    let ingress = Arc::new(WebhookIngress::new(
        env_resolver(),
        engine.clone(),
        audit,
    ));

    // Background scheduler with watch-channel shutdown
    let scheduler_config = SchedulerConfig::from_env();
    let scheduler = Arc::new(Scheduler::new(
        scheduler_config,
        attempts,
        registrations,
        directory,
        catalog,
        notifier,
        notification_log,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    // Build application state
    let app_state = AppState {
        attempts: attempt_service,
        engine,
        ingress,
        provider_configured,
    };

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        // Health
        .route("/health", get(health_check))

        // Checkout API
        .route("/api/attempts", post(create_attempt))
        .route("/api/attempts/{id}/initialize", post(initialize_payment))
        .route("/api/payments/verify/{reference}", get(verify_payment))

        // Operator API
        .route("/api/attempts/{id}/cancel", post(cancel_attempt))
        .route("/api/attempts/{id}/notes", post(update_notes))

        // Provider webhook
        .route("/webhook/provider", post(provider_webhook))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 classpay server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                           - Health check");
    tracing::info!("  POST /api/attempts                     - Create payment attempt");
    tracing::info!("  POST /api/attempts/:id/initialize      - Initialize hosted payment");
    tracing::info!("  GET  /api/payments/verify/:reference   - Verify and reconcile");
    tracing::info!("  POST /api/attempts/:id/cancel          - Cancel attempt (operator)");
    tracing::info!("  POST /api/attempts/:id/notes           - Update notes (operator)");
    tracing::info!("  POST /webhook/provider                 - Provider webhook");
    tracing::info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Stop the scheduler after the server drains
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;

    Ok(())
}
