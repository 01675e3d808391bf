//! # Error Handling
//!
//! Every failed request leaves the service as `application/problem+json` with
//! a stable machine-readable `code` and the trace id of the request, so an
//! operator can find the matching log lines.

use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::stores::StoreError;
use crate::telemetry;

const PROBLEM_JSON: &str = "application/problem+json";

/// Problem document returned by every failing endpoint
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    /// Stable error code, e.g. `VALIDATION_FAILED`
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// Structured context, such as the offending fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Trace id for correlating with service logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
            trace_id: Some(trace_id()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn validation(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(details)
    }

    /// The periodic checker is switched off, so on-demand passes are refused.
    pub fn checker_disabled() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "CHECKER_DISABLED",
            "Periodic webhook checker is disabled",
        )
    }

    pub fn database_unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Database service unavailable",
        )
    }
}

/// Trace id of the running request; outside a request a short correlation
/// id is generated instead.
fn trace_id() -> String {
    telemetry::current_trace_id().unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("corr-{}", &id[..8])
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, [(header::CONTENT_TYPE, PROBLEM_JSON)], Json(self)).into_response()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            format!("Invalid query parameters: {}", rejection.body_text()),
        )
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Database(sea_orm::DbErr::Conn(err)) => {
                tracing::error!(error = %err, "Database connection lost");
                Self::database_unavailable()
            }
            StoreError::Database(err) => {
                tracing::error!(error = %err, "Store query failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
            StoreError::Corrupt { table, details } => {
                tracing::error!(table, %details, "Corrupt row in store");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CORRUPT_DATA",
                    format!("Stored {} data is corrupt", table),
                )
            }
        }
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        StoreError::Database(error).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn problem_document_has_content_type_and_code() {
        let response = ApiError::checker_disabled().into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROBLEM_JSON
        );
    }

    #[test]
    fn status_is_not_serialized() {
        let body = serde_json::to_value(ApiError::unauthorized("Invalid bearer token")).unwrap();

        assert_eq!(body["code"], "UNAUTHORIZED");
        assert_eq!(body["message"], "Invalid bearer token");
        assert!(body.get("status").is_none());
        assert!(body.get("details").is_none());
    }

    #[test]
    fn trace_id_generated_outside_request() {
        let trace_id = ApiError::database_unavailable().trace_id.unwrap();

        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[tokio::test]
    async fn trace_id_taken_from_request_context() {
        let context = telemetry::TraceContext {
            trace_id: "trace-abc".to_string(),
        };

        let error = telemetry::with_trace_context(context, async {
            ApiError::unauthorized("nope")
        })
        .await;

        assert_eq!(error.trace_id.as_deref(), Some("trace-abc"));
    }

    #[test]
    fn store_errors_map_to_server_errors() {
        let corrupt: ApiError = StoreError::Corrupt {
            table: "webhooks",
            details: "unknown status 'weird'".to_string(),
        }
        .into();
        assert_eq!(corrupt.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(corrupt.code, "CORRUPT_DATA");
        assert!(!corrupt.message.contains("weird"));

        let query: ApiError =
            StoreError::Database(sea_orm::DbErr::Custom("boom".to_string())).into();
        assert_eq!(query.code, "INTERNAL_SERVER_ERROR");
    }

    #[test]
    fn validation_error_carries_details() {
        let error = ApiError::validation("Invalid repository", json!({ "blank": ["owner"] }));

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.details, Some(json!({ "blank": ["owner"] })));
    }
}
