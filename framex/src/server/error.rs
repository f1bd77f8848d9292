use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::{error, warn};
use thiserror::Error;

use crate::extract::ExtractError;

/**
    An error returned to HTTP clients as `{"error": "..."}`.
*/
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing locator or file, or a body that could not be read.
    #[error("{0}")]
    BadRequest(String),

    /// Well-formed request the extractor cannot satisfy.
    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(error: ExtractError) -> Self {
        let message = error.to_string();
        match error {
            ExtractError::SourceUnavailable(_) | ExtractError::NoFramesProduced => {
                ApiError::Unprocessable(message)
            }
            ExtractError::EncoderFailed { .. }
            | ExtractError::ProtocolAnomaly(_)
            | ExtractError::DownstreamDisconnected
            | ExtractError::Cancelled
            | ExtractError::Spawn { .. }
            | ExtractError::Io(_) => ApiError::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("[server] {}", self);
        } else {
            warn!("[server] {} ({})", self, status.as_u16());
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
