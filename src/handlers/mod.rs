//! # API Handlers
//!
//! HTTP endpoint handlers for the hookwatch API.

pub mod webhooks;

use axum::{extract::State, http::StatusCode, response::Json};

use crate::db;
use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::server::AppState;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness probe that also verifies the database answers
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 204, description = "Service and database are reachable"),
        (status = 503, description = "Database unavailable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn healthz(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    db::health_check(&state.db).await.map_err(|err| {
        tracing::warn!(error = %err, "Database health check failed");
        ApiError::database_unavailable()
    })?;
    Ok(StatusCode::NO_CONTENT)
}
