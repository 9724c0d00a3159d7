//! Sessions: one logical unit-of-work handle per request.
//!
//! A session checks out its connection lazily on first use and keeps that one
//! connection until it is closed. Statements run inside an implicit
//! transaction that starts with the first statement after a commit or
//! rollback.

use super::error::DbError;
use super::manager::{ConnectionManager, DbConnection};
use super::pool::{Pool, PooledConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Committed,
    RolledBack,
    Closed,
}

pub struct Session<M: ConnectionManager> {
    pool: Pool<M>,
    conn: Option<PooledConnection<M>>,
    state: SessionState,
    in_transaction: bool,
}

impl<M: ConnectionManager> Session<M> {
    pub fn new(pool: Pool<M>) -> Self {
        Self {
            pool,
            conn: None,
            state: SessionState::Active,
            in_transaction: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a physical connection is currently checked out.
    pub fn is_bound(&self) -> bool {
        self.conn.is_some()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn connection_id(&self) -> Option<u64> {
        self.conn.as_ref().map(PooledConnection::id)
    }

    pub async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        self.begin().await?.execute(sql).await
    }

    pub async fn fetch_scalar(&mut self, sql: &str) -> Result<Option<i64>, DbError> {
        self.begin().await?.fetch_scalar(sql).await
    }

    /// Commit the open transaction, if any. The session stays usable.
    pub async fn commit(&mut self) -> Result<(), DbError> {
        if self.state == SessionState::Closed {
            return Err(DbError::SessionClosed);
        }
        if self.in_transaction {
            let conn = self.conn.as_mut().ok_or(DbError::SessionClosed)?;
            // A failed COMMIT still ends the transaction server-side.
            let result = conn.execute("COMMIT").await;
            self.in_transaction = false;
            result?;
        }
        self.state = SessionState::Committed;
        Ok(())
    }

    /// Roll back the open transaction, if any. The session stays usable.
    pub async fn rollback(&mut self) -> Result<(), DbError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        if self.in_transaction {
            let conn = self.conn.as_mut().ok_or(DbError::SessionClosed)?;
            let result = conn.execute("ROLLBACK").await;
            self.in_transaction = false;
            if result.is_err() {
                conn.discard();
            }
            result?;
        }
        self.state = SessionState::RolledBack;
        Ok(())
    }

    /// Roll back anything pending and hand the connection back to the pool.
    ///
    /// Always ends in [`SessionState::Closed`], even when the rollback or the
    /// release fails; the first failure is returned.
    pub async fn close(&mut self) -> Result<(), DbError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        let mut outcome = if self.in_transaction {
            self.rollback().await
        } else {
            Ok(())
        };

        self.state = SessionState::Closed;
        if let Some(conn) = self.conn.take() {
            let connection_id = conn.id();
            let released = self.pool.release(conn);
            tracing::debug!(connection_id, ok = released.is_ok(), "session released connection");
            if outcome.is_ok() {
                outcome = released;
            }
        }
        outcome
    }

    /// Close without awaiting anything.
    ///
    /// Used when a unit of work is dropped before its teardown ran. A
    /// connection with an open transaction is discarded, which makes the
    /// server roll the transaction back.
    pub fn abandon(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if self.in_transaction {
                tracing::warn!(
                    connection_id = conn.id(),
                    "session abandoned mid-transaction, discarding connection"
                );
                conn.discard();
            }
        }
        self.in_transaction = false;
        self.state = SessionState::Closed;
    }

    async fn begin(&mut self) -> Result<&mut PooledConnection<M>, DbError> {
        if self.state == SessionState::Closed {
            return Err(DbError::SessionClosed);
        }
        if self.conn.is_none() {
            let conn = self.pool.acquire().await?;
            tracing::debug!(connection_id = conn.id(), "session bound to connection");
            self.conn = Some(conn);
        }

        let conn = self.conn.as_mut().ok_or(DbError::SessionClosed)?;
        if !self.in_transaction {
            conn.execute("BEGIN").await?;
            self.in_transaction = true;
            self.state = SessionState::Active;
        }
        Ok(conn)
    }
}

impl<M: ConnectionManager> Drop for Session<M> {
    fn drop(&mut self) {
        self.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::PoolConfig;
    use crate::db::testing::MemoryManager;

    fn pool(manager: &MemoryManager) -> Pool<MemoryManager> {
        Pool::new(manager.clone(), PoolConfig::default())
    }

    #[tokio::test]
    async fn binds_connection_lazily() {
        let manager = MemoryManager::new();
        let pool = pool(&manager);
        let mut session = Session::new(pool.clone());

        assert!(!session.is_bound());
        assert_eq!(pool.status().open, 0);

        assert_eq!(session.fetch_scalar("SELECT 1").await.expect("select"), Some(1));
        assert!(session.is_bound());
        assert!(session.in_transaction());
        assert_eq!(pool.status().checked_out, 1);
    }

    #[tokio::test]
    async fn keeps_one_connection_across_transactions() {
        let manager = MemoryManager::new();
        let mut session = Session::new(pool(&manager));

        session.execute("SET a 1").await.expect("write");
        let first = session.connection_id();
        session.commit().await.expect("commit");
        assert_eq!(session.state(), SessionState::Committed);

        session.execute("SET a 2").await.expect("write");
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.connection_id(), first);
        assert_eq!(manager.opened(), 1);
    }

    #[tokio::test]
    async fn close_rolls_back_and_returns_connection() {
        let manager = MemoryManager::new();
        let pool = pool(&manager);
        let mut session = Session::new(pool.clone());

        session.execute("SET pending 7").await.expect("write");
        session.close().await.expect("close");

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(manager.rollbacks(), 1);
        assert_eq!(manager.committed("pending"), None);
        assert_eq!(pool.status().idle, 1);
        assert_eq!(pool.status().checked_out, 0);
    }

    #[tokio::test]
    async fn closed_session_rejects_work() {
        let manager = MemoryManager::new();
        let mut session = Session::new(pool(&manager));
        session.close().await.expect("close");

        assert!(matches!(session.execute("SET a 1").await, Err(DbError::SessionClosed)));
        assert!(matches!(session.commit().await, Err(DbError::SessionClosed)));
        assert_eq!(manager.opened(), 0);
    }

    #[tokio::test]
    async fn dropping_mid_transaction_discards_connection() {
        let manager = MemoryManager::new();
        let pool = pool(&manager);
        let mut session = Session::new(pool.clone());

        session.execute("SET orphan 1").await.expect("write");
        drop(session);

        let status = pool.status();
        assert_eq!(status.open, 0);
        assert_eq!(status.checked_out, 0);
        assert_eq!(manager.live(), 0);
        assert_eq!(manager.committed("orphan"), None);
    }

    #[tokio::test]
    async fn broken_connection_surfaces_on_close() {
        let manager = MemoryManager::new();
        let pool = pool(&manager);
        let mut session = Session::new(pool.clone());

        session.execute("SET a 1").await.expect("write");
        session.commit().await.expect("commit");
        let err = session.execute("BREAK").await.err().expect("socket dropped");
        assert!(matches!(err, DbError::Driver(_)));

        // rollback on a dead socket fails; close still ends closed and empties the slot
        assert!(session.close().await.is_err());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(pool.status().open, 0);
    }
}
