//! # Webhook Handlers
//!
//! On-demand reconciliation trigger, the scoped webhook health report and the
//! per-repository status lookup.

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::health::{
    CATEGORY_DESCRIPTION, CATEGORY_ID, CATEGORY_SEVERITY, HealthItem, REPORT_TYPE, Severity,
};
use crate::identity::RepositoryIdentity;
use crate::server::AppState;
use crate::status::{DerivedHealthStatus, ReconciliationOutcome, RecordedStatus, derive_health_status};
use crate::stores::{HealthScope, WebhookRegistration};

/// Accepted on-demand check request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckAccepted {
    /// Always `accepted`; the pass runs in the background
    pub status: String,
}

/// Health report query parameters
#[derive(Debug, Deserialize, IntoParams)]
pub struct HealthQuery {
    /// Project to report on; the whole server when absent
    pub project_id: Option<String>,
    /// Include sub-projects (default true)
    pub recursive: Option<bool>,
}

impl HealthQuery {
    fn scope(self) -> HealthScope {
        match self.project_id.map(|id| id.trim().to_string()) {
            Some(project_id) if !project_id.is_empty() => HealthScope::Project {
                project_id,
                recursive: self.recursive.unwrap_or(true),
            },
            _ => HealthScope::Global,
        }
    }
}

/// Webhook health report for a scope
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthReportResponse {
    #[schema(example = "GitHub.WebHookIncorrect")]
    pub report_type: String,
    #[schema(example = "GH.WebHook.Incorrect")]
    pub category: String,
    pub description: String,
    pub severity: Severity,
    pub items: Vec<HealthItem>,
}

impl HealthReportResponse {
    fn new(items: Vec<HealthItem>) -> Self {
        Self {
            report_type: REPORT_TYPE.to_string(),
            category: CATEGORY_ID.to_string(),
            description: CATEGORY_DESCRIPTION.to_string(),
            severity: CATEGORY_SEVERITY,
            items,
        }
    }
}

/// Repository identity query parameters
#[derive(Debug, Deserialize, IntoParams)]
pub struct StatusQuery {
    /// Git host, e.g. `github.com`
    pub server: String,
    pub owner: String,
    pub name: String,
}

/// Recorded and derived webhook status of a repository
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookStatusResponse {
    pub repository: RepositoryIdentity,
    pub status: DerivedHealthStatus,
    pub recorded_status: Option<RecordedStatus>,
    pub registrations: Vec<WebhookRegistration>,
    /// Most recent non-OK outcome, while it is still remembered
    pub last_outcome: Option<ReconciliationOutcome>,
}

/// Request a reconciliation pass
#[utoipa::path(
    post,
    path = "/webhooks/check",
    security(("bearer_auth" = [])),
    responses(
        (status = 202, description = "Pass requested; coalesced with any pass already pending", body = CheckAccepted),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 503, description = "Periodic checker disabled", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn request_check(
    State(state): State<AppState>,
    _auth: OperatorAuth,
) -> Result<(StatusCode, Json<CheckAccepted>), ApiError> {
    if !state.config.checker.enabled {
        return Err(ApiError::checker_disabled());
    }

    state.checker.request_check();
    tracing::info!("On-demand webhook check accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(CheckAccepted {
            status: "accepted".to_string(),
        }),
    ))
}

/// Webhook health items for a project scope
#[utoipa::path(
    get,
    path = "/webhooks/health",
    params(HealthQuery),
    responses(
        (status = 200, description = "Unhealthy webhooks in scope", body = HealthReportResponse),
        (status = 400, description = "Invalid query", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn health_report(
    State(state): State<AppState>,
    query: Result<Query<HealthQuery>, QueryRejection>,
) -> Result<Json<HealthReportResponse>, ApiError> {
    let Query(query) = query?;
    let scope = query.scope();

    if !state.health.can_report_items_for(&scope).await? {
        return Ok(Json(HealthReportResponse::new(Vec::new())));
    }

    let items = state.health.report(&scope).await?;
    tracing::debug!(?scope, items = items.len(), "Built webhook health report");
    Ok(Json(HealthReportResponse::new(items)))
}

/// Status of the webhook registered for one repository
#[utoipa::path(
    get,
    path = "/webhooks/status",
    params(StatusQuery),
    responses(
        (status = 200, description = "Webhook status", body = WebhookStatusResponse),
        (status = 400, description = "Invalid repository", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn webhook_status(
    State(state): State<AppState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<WebhookStatusResponse>, ApiError> {
    let Query(query) = query?;

    let blank: Vec<&str> = [
        ("server", &query.server),
        ("owner", &query.owner),
        ("name", &query.name),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(field, _)| field)
    .collect();
    if !blank.is_empty() {
        return Err(ApiError::validation(
            "Repository identity is incomplete",
            json!({ "blank": blank }),
        ));
    }

    let repository = RepositoryIdentity::new(
        query.server.trim(),
        query.owner.trim(),
        query.name.trim(),
    );
    let registrations = state.registrations.get_hooks(&repository).await?;
    let status = derive_health_status(registrations.first());
    let recorded_status = registrations.first().map(|hook| hook.status);

    Ok(Json(WebhookStatusResponse {
        status,
        recorded_status,
        last_outcome: state.checker.outcomes().get(&repository),
        registrations,
        repository,
    }))
}
