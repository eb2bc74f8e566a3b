use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::fields::codec::FieldError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Service error taxonomy. Validation problems carry the offending field;
/// everything unexpected collapses to a logged 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }
}

impl From<FieldError> for ApiError {
    fn from(err: FieldError) -> Self {
        ApiError::Validation {
            field: err.field().to_owned(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, field) = match &self {
            ApiError::Validation { field, .. } => (StatusCode::BAD_REQUEST, Some(field.clone())),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, None),
            ApiError::Internal(error) => {
                tracing::error!(?error, "unexpected api error");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "field": field,
                "status": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}
