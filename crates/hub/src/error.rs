use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use farming_common::Envelope;

/// Errors returned by the HTTP handlers. Rendered as a failure envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("device {0} is offline")]
    DeviceOffline(String),

    #[error("relay is not available")]
    RelayUnavailable,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::DeviceOffline(_) => StatusCode::CONFLICT,
            ApiError::RelayUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(Envelope::<()>::failure(message))).into_response()
    }
}
