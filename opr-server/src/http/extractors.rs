//! Custom Axum extractors

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tokio::sync::OwnedMutexGuard;

use super::binder::SessionSlot;
use super::error::ApiError;
use crate::db::{ConnectionManager, DbError, Session};

/// The database session bound to the current request.
///
/// Fails with [`DbError::SessionMissing`] when the route is not behind the
/// session binder.
pub struct DbSession<M: ConnectionManager>(SessionSlot<M>);

impl<M: ConnectionManager> DbSession<M> {
    /// Exclusive access to the session for the lifetime of the guard.
    pub async fn lock(&self) -> OwnedMutexGuard<Session<M>> {
        self.0.lock().await
    }
}

impl<S, M> FromRequestParts<S> for DbSession<M>
where
    S: Send + Sync,
    M: ConnectionManager,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionSlot<M>>()
            .cloned()
            .map(Self)
            .ok_or(ApiError::Database(DbError::SessionMissing))
    }
}
