//! # Server Configuration
//!
//! Wires the repositories, the webhook checker and the health aggregator into
//! shared application state and serves the HTTP API.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::checker::{CheckerCollaborators, WebhookChecker};
use crate::config::AppConfig;
use crate::connectors::GitHubClientFactory;
use crate::handlers;
use crate::health::HealthAggregator;
use crate::repositories::{
    CredentialRepository, ScopeRepository, SecurityBindingRepository, WebhookRepository,
};
use crate::status::OutcomeCache;
use crate::stores::RegistrationStore;
use crate::telemetry::trace_id_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub checker: Arc<WebhookChecker>,
    pub health: Arc<HealthAggregator>,
    pub registrations: Arc<dyn RegistrationStore>,
}

impl AppState {
    /// Builds the SeaORM-backed stores and services over `db`.
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection) -> anyhow::Result<Self> {
        let shared_db = Arc::new(db.clone());
        let registrations: Arc<dyn RegistrationStore> =
            Arc::new(WebhookRepository::new(shared_db.clone()));

        let outcomes = Arc::new(OutcomeCache::with_system_clock(
            config.checker.cache_capacity()?,
            config.checker.outcome_ttl(),
        ));

        let collaborators = CheckerCollaborators {
            registrations: registrations.clone(),
            bindings: Arc::new(SecurityBindingRepository::new(shared_db.clone())),
            credentials: Arc::new(CredentialRepository::new(shared_db.clone())),
            clients: Arc::new(GitHubClientFactory::new(config.github_api_base.clone())),
        };

        let checker = Arc::new(WebhookChecker::new(
            collaborators,
            config.checker.clone(),
            outcomes.clone(),
        ));

        let health = Arc::new(HealthAggregator::new(
            registrations.clone(),
            Arc::new(ScopeRepository::new(shared_db)),
            outcomes,
        ));

        Ok(Self {
            config,
            db,
            checker,
            health,
            registrations,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/webhooks/check", post(handlers::webhooks::request_check))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/webhooks/health", get(handlers::webhooks::health_report))
        .route("/webhooks/status", get(handlers::webhooks::webhook_status))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id_middleware))
}

/// Serves the API and, when enabled, the periodic checker until `shutdown` fires.
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = config
        .bind_addr()
        .with_context(|| format!("Invalid server address '{}'", config.api_bind_addr))?;

    let state = AppState::new(Arc::new(config), db)?;

    let checker_task = if state.config.checker.enabled {
        let checker = state.checker.clone();
        let token = shutdown.child_token();
        Some(tokio::spawn(async move { checker.run(token).await }))
    } else {
        tracing::info!("Periodic webhook checker disabled by configuration");
        None
    };

    let app = create_app(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, profile = %state.config.profile, "Server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("HTTP server failed")?;

    if let Some(task) = checker_task {
        shutdown.cancel();
        if let Err(err) = task.await {
            tracing::error!(error = %err, "Webhook checker task panicked");
        }
    }

    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::webhooks::request_check,
        crate::handlers::webhooks::health_report,
        crate::handlers::webhooks::webhook_status,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::webhooks::CheckAccepted,
            crate::handlers::webhooks::HealthReportResponse,
            crate::handlers::webhooks::WebhookStatusResponse,
            crate::health::HealthItem,
            crate::health::Severity,
            crate::identity::RepositoryIdentity,
            crate::status::DerivedHealthStatus,
            crate::status::RecordedStatus,
            crate::status::ReconciliationOutcome,
            crate::stores::WebhookRegistration,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "hookwatch API",
        description = "Reconciles recorded GitHub repository webhooks with their live configuration",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
