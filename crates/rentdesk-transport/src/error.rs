//! HTTP error mapping.
//!
//! Every error renders as `{"detail": "<message>"}`. Agent and backend
//! failures keep their original message.

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rentdesk_session::ManagerError;
use thiserror::Error;

use crate::protocol::ErrorResponse;

/// API error.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The multipart body could not be read.
    #[error("Invalid form data: {}", .0.body_text())]
    Multipart(#[from] MultipartError),

    /// The `query` form field is missing.
    #[error("Missing required form field: query")]
    MissingQuery,

    /// Session storage or agent failure.
    #[error(transparent)]
    Manager(#[from] ManagerError),
}

impl ApiError {
    /// Status code for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Multipart(e) => e.status(),
            Self::MissingQuery => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Manager(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            detail: self.to_string(),
        });

        (status, body).into_response()
    }
}
