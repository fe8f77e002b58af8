//! HTTP error mapping.
//!
//! Two wire shapes: `{"detail": "..."}` for simple errors and
//! `{"detail": [{"loc": [...], "msg": "...", "type": "..."}]}` for
//! validation failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use agt_schemas::FieldError;

#[derive(Debug)]
pub enum ApiError {
    /// Simple error with a stable detail message.
    Detail(StatusCode, String),
    /// Field-level validation errors (422 on bodies, 400 on filters).
    Validation(StatusCode, Vec<FieldError>),
    /// Engine or unexpected failure; detail is not leaked to clients.
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::Detail(StatusCode::BAD_REQUEST, msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::Detail(StatusCode::NOT_FOUND, msg.into())
    }

    pub fn unprocessable(errors: Vec<FieldError>) -> Self {
        ApiError::Validation(StatusCode::UNPROCESSABLE_ENTITY, errors)
    }

    pub fn bad_filter(errors: Vec<FieldError>) -> Self {
        ApiError::Validation(StatusCode::BAD_REQUEST, errors)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        // A CHECK constraint slipping past validation is a client contract
        // violation, not an engine failure.
        if let Some(db) = find_db_error(&e) {
            if db.message().contains("CHECK constraint failed") {
                return ApiError::Detail(
                    StatusCode::BAD_REQUEST,
                    "store constraint violated".to_string(),
                );
            }
        }
        ApiError::Internal(e)
    }
}

fn find_db_error(e: &anyhow::Error) -> Option<&dyn sqlx::error::DatabaseError> {
    e.chain()
        .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .find_map(|sql| match sql {
            sqlx::Error::Database(db) => Some(db.as_ref()),
            _ => None,
        })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Detail(status, detail) => {
                (status, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::Validation(status, errors) => {
                (status, Json(json!({ "detail": errors }))).into_response()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}
