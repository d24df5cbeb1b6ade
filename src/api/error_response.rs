//! Conversions from domain errors to HTTP responses

use crate::error::{ApiError, Error, ToHttpStatus};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(ApiError::from(self))).into_response()
    }
}

/// An `ApiError` on its own carries no status; it is reported as a 500
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

/// 409 for an operation the command's current partition does not allow
pub(crate) fn conflict(code: &str, message: impl Into<String>) -> Response {
    (StatusCode::CONFLICT, Json(ApiError::new(code, message))).into_response()
}

/// 400 for a request body that does not describe a valid command
pub(crate) fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiError::validation(message))).into_response()
}
