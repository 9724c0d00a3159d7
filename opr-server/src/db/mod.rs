//! Database layer - pool, sessions and transactional scopes
//!
//! # Design Principles
//!
//! - One explicit [`Database`] service object owns the pool; handlers get it
//!   through state, never through globals
//! - One session per unit of work, one physical connection per session
//! - Every failure is sanitized before it is logged or returned

pub mod error;
pub mod manager;
pub mod pool;
pub mod postgres;
pub mod session;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{DbError, DriverFailure, FailureKind};
pub use manager::{ConnectionManager, DbConnection};
pub use pool::{Pool, PoolConfig, PoolMetrics, PoolStatus, PooledConnection};
pub use postgres::{PgConnectionManager, PgSessionConnection};
pub use session::{Session, SessionState};

/// Service object handed to the HTTP layer. Cloning shares the pool.
pub struct Database<M: ConnectionManager> {
    pool: Pool<M>,
}

impl<M: ConnectionManager> Clone for Database<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<M: ConnectionManager> Database<M> {
    pub fn new(manager: M, config: PoolConfig) -> Self {
        Self {
            pool: Pool::new(manager, config),
        }
    }

    pub fn pool(&self) -> &Pool<M> {
        &self.pool
    }

    /// Start a new unit of work. No connection is checked out until first use.
    pub fn session(&self) -> Session<M> {
        Session::new(self.pool.clone())
    }

    /// Run `SELECT 1` on a fresh session and release it.
    pub async fn probe(&self) -> Result<(), DbError> {
        let mut session = self.session();
        session
            .scope_and_close(|s| {
                Box::pin(async move {
                    s.fetch_scalar("SELECT 1").await?;
                    Ok(())
                })
            })
            .await
    }

    pub fn close(&self) {
        self.pool.close();
    }
}
