use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Every failure a dispatch operation can surface. Each variant maps to a
/// distinct HTTP status and a machine-readable `kind`, so clients can tell
/// a lost race (`Conflict`, retry with fresh state) from an illegal
/// operation (`InvalidTransition`, do not retry).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("cannot {event} while {state}")]
    InvalidTransition {
        event: &'static str,
        state: String,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("driver has {overdue} overdue deliveries to finish first")]
    Blocked { overdue: usize },

    #[error("external service failure: {0}")]
    ExternalService(String),

    #[error("{0}")]
    Validation(String),
}

impl DispatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::NotFound(_) => "not_found",
            DispatchError::Conflict(_) => "conflict",
            DispatchError::InvalidTransition { .. } => "invalid_transition",
            DispatchError::Forbidden(_) => "forbidden",
            DispatchError::Blocked { .. } => "blocked",
            DispatchError::ExternalService(_) => "external_service",
            DispatchError::Validation(_) => "validation",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::Conflict(_) => StatusCode::CONFLICT,
            DispatchError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::Forbidden(_) => StatusCode::FORBIDDEN,
            DispatchError::Blocked { .. } => StatusCode::LOCKED,
            DispatchError::ExternalService(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "kind": self.kind(),
            "error": self.to_string(),
        });

        if let DispatchError::Blocked { overdue } = &self {
            body["overdue"] = json!(overdue);
        }

        (self.status_code(), Json(body)).into_response()
    }
}
