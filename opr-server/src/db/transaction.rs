//! Transactional scope around a unit of work.
//!
//! ```ignore
//! let count: i64 = session
//!     .scope(|s| Box::pin(async move {
//!         s.execute("UPDATE ...").await?;
//!         Ok::<_, ApiError>(s.fetch_scalar("SELECT count(*) FROM ...").await?.unwrap_or(0))
//!     }))
//!     .await?;
//! ```
//!
//! On every exit path the scope commits or rolls back exactly once, then
//! optionally closes the session. A failure is sanitized before anything logs
//! it and is handed back to the caller with its kind unchanged.

use std::fmt;

use futures::future::BoxFuture;

use super::error::DbError;
use super::manager::ConnectionManager;
use super::session::{Session, SessionState};
use crate::sanitize::Sanitize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeExit {
    Keep,
    Close,
}

impl<M: ConnectionManager> Session<M> {
    /// Run `work` in a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// The session stays open afterwards and can run further scopes.
    pub async fn scope<F, T, E>(&mut self, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut Session<M>) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<DbError> + Sanitize + fmt::Display + Send,
    {
        self.run_scope(work, ScopeExit::Keep).await
    }

    /// Like [`Session::scope`], then close the session and release its connection.
    pub async fn scope_and_close<F, T, E>(&mut self, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut Session<M>) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<DbError> + Sanitize + fmt::Display + Send,
    {
        self.run_scope(work, ScopeExit::Close).await
    }

    async fn run_scope<F, T, E>(&mut self, work: F, exit: ScopeExit) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut Session<M>) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<DbError> + Sanitize + fmt::Display + Send,
    {
        if self.state() == SessionState::Closed {
            return Err(E::from(DbError::SessionClosed));
        }

        let outcome = match work(self).await {
            Ok(value) => match self.commit().await {
                Ok(()) => Ok(value),
                Err(err) => {
                    let err = err.sanitize();
                    tracing::error!(error = %err, "commit failed, rolling back");
                    self.rollback_after_failure().await;
                    Err(E::from(err))
                }
            },
            Err(err) => {
                let err = err.sanitize();
                tracing::warn!(error = %err, "unit of work failed, rolling back");
                self.rollback_after_failure().await;
                Err(err)
            }
        };

        if exit == ScopeExit::Close {
            if let Err(err) = self.close().await {
                tracing::warn!(error = %err, "failed to close session after scope");
            }
        }
        outcome
    }

    async fn rollback_after_failure(&mut self) {
        if let Err(err) = self.rollback().await {
            tracing::error!(error = %err, "rollback failed");
        }
    }
}
