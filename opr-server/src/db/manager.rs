//! Connection capabilities the pool and sessions are generic over.

use async_trait::async_trait;

use super::error::DbError;

/// A physical database connection.
#[async_trait]
pub trait DbConnection: Send + 'static {
    /// Run a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError>;

    /// Run a query and return the first column of the first row, if any.
    async fn fetch_scalar(&mut self, sql: &str) -> Result<Option<i64>, DbError>;

    /// Local health check, no round trip.
    ///
    /// A connection that reports broken is discarded instead of returning to idle.
    fn is_broken(&self) -> bool;
}

/// Opens physical connections for one fixed configuration.
///
/// A pool owns exactly one manager, so connections opened for one schema are
/// never handed out by a pool configured for another.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: DbConnection;

    async fn connect(&self) -> Result<Self::Connection, DbError>;

    /// Schema search path every connection is opened with.
    fn schema(&self) -> &str;
}
