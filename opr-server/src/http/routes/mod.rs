//! Route handlers

pub mod health;

use axum::http::Uri;

use super::error::ApiError;

/// Fallback for paths no route matches.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound {
        resource: uri.path().to_owned(),
    }
}
