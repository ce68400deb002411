//! Error types and HTTP status mapping for the server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use radiance::RadianceError;

/// Stable error codes returned in the `error.code` field.
pub mod error_codes {
    pub const VALIDATION: &str = "E_VALIDATION";
    pub const NOT_FOUND: &str = "E_NOT_FOUND";
    pub const UNAUTHORIZED: &str = "E_UNAUTHORIZED";
    pub const INTERNAL: &str = "E_INTERNAL";
}

/// All errors that can occur while serving a request or running a phase.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or wrong bearer token.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Persistence(_) | ApiError::Io(_) | ApiError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        use error_codes::*;
        match self {
            ApiError::Validation(_) => VALIDATION,
            ApiError::NotFound(_) => NOT_FOUND,
            ApiError::Unauthorized => UNAUTHORIZED,
            ApiError::Persistence(_) | ApiError::Io(_) | ApiError::Json(_) => INTERNAL,
        }
    }

    /// Message safe to show a client. Internal failures never expose detail.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Validation(_) | ApiError::NotFound(_) | ApiError::Unauthorized => {
                self.to_string()
            }
            _ => "internal error".to_string(),
        }
    }
}

impl From<RadianceError> for ApiError {
    fn from(e: RadianceError) -> Self {
        match e {
            RadianceError::Validation(msg) => ApiError::Validation(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        (
            status,
            Json(serde_json::json!({
                "error": {
                    "code": self.code(),
                    "message": self.public_message(),
                }
            })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
