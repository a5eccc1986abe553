use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use planner_core::PlannerError;
use serde::Serialize;

use crate::SERVICE_CONTRACT_VERSION;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

impl ServiceError {
    pub fn bad_request(field: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, Some(field.to_string()))
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not found", None)
    }

    fn new(status: StatusCode, message: impl Into<String>, field: Option<String>) -> Self {
        Self {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
            field,
        }
    }
}

impl From<PlannerError> for ServiceError {
    fn from(err: PlannerError) -> Self {
        match err {
            PlannerError::Validation { field, message } => {
                Self::new(StatusCode::BAD_REQUEST, format!("{field} {message}"), Some(field))
            }
            PlannerError::NotFound => Self::new(StatusCode::NOT_FOUND, "record not found", None),
            PlannerError::Unauthenticated(reason) => {
                Self::new(StatusCode::UNAUTHORIZED, format!("unauthenticated: {reason}"), None)
            }
            // Internal detail is logged by the API layer, not echoed to clients.
            PlannerError::StoreUnavailable(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "record store unavailable", None)
            }
            PlannerError::Collaborator(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "upstream collaborator failed", None)
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.error, "request failed");
        } else {
            tracing::warn!(
                status = %self.status,
                error = %self.error,
                field = self.field.as_deref().unwrap_or("-"),
                "request rejected"
            );
        }
        (self.status, Json(self)).into_response()
    }
}
