//! API error type with IntoResponse
//!
//! Errors render as the standard envelope. Database failures map to a fixed
//! public message per kind; driver text is only ever logged, sanitized.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::response::{Envelope, ErrorDetail};
use crate::db::DbError;
use crate::sanitize::{strip_detail, Sanitize};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Pool, session or statement failure (503 when unavailable, else 500)
    #[error(transparent)]
    Database(#[from] DbError),

    /// No route for the path (404)
    #[error("resource '{resource}' not found")]
    NotFound { resource: String },

    /// Internal error (500, logged)
    #[error("{message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Database(err) if err.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
        }
    }
}

impl Sanitize for ApiError {
    fn sanitize(self) -> Self {
        match self {
            Self::Database(err) => Self::Database(err.sanitize()),
            Self::Internal { message } => Self::Internal {
                message: strip_detail(&message),
            },
            other => other,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = match self.sanitize() {
            Self::Database(err) => {
                tracing::error!(kind = err.kind_name(), error = %err, "database error");
                Envelope::error(
                    status,
                    err.public_message(),
                    vec![ErrorDetail::new(err.kind_name(), err.public_message())],
                )
            }
            Self::NotFound { resource } => Envelope::error(
                status,
                "Not Found",
                vec![ErrorDetail::new(
                    "NotFound",
                    format!("resource '{resource}' not found"),
                )],
            ),
            Self::Internal { message } => {
                tracing::error!(error = %message, "internal error");
                Envelope::error(
                    status,
                    "an internal error occurred",
                    vec![ErrorDetail::new("InternalError", "an internal error occurred")],
                )
            }
        };

        envelope.into_response()
    }
}
