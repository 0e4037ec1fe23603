//! Error responses for the HTTP API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lxc_common::LxcError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Input rejected before anything ran.
    #[error("{0}")]
    BadRequest(String),

    /// An external command ran and failed; `details` is its stderr.
    #[error("{message}: {details}")]
    Execution { message: String, details: String },

    /// Anything else. The detail is logged, never returned.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn execution(message: impl Into<String>, details: impl Into<String>) -> Self {
        ApiError::Execution {
            message: message.into(),
            details: details.into(),
        }
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Execution { .. } | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<LxcError> for ApiError {
    fn from(err: LxcError) -> Self {
        if err.is_client_error() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

/// Body of every failure response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            ApiError::BadRequest(message) => ErrorBody {
                error: message,
                details: None,
            },
            ApiError::Execution { message, details } => ErrorBody {
                error: message,
                details: Some(details),
            },
            ApiError::Internal(detail) => {
                error!("Internal error: {}", detail);
                ErrorBody {
                    error: "Internal server error".to_string(),
                    details: None,
                }
            }
        };

        (status, Json(body)).into_response()
    }
}
