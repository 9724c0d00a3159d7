//! Database connection pool management
//!
//! A bounded set of physical connections: up to `pool_size` are kept idle
//! between checkouts, and up to `max_overflow` more may be opened under load.
//! Overflow connections are closed when returned rather than kept idle.
//!
//! Checkouts are gated by a semaphore with `pool_size + max_overflow` permits,
//! so a caller waits (never spins) for a free slot and gives up with
//! [`DbError::PoolExhausted`] after `acquire_timeout`.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::error::DbError;
use super::manager::{ConnectionManager, DbConnection};

/// Connections kept idle between checkouts.
pub const DEFAULT_POOL_SIZE: usize = 20;

/// Connections allowed beyond the pool size under load.
pub const DEFAULT_MAX_OVERFLOW: usize = 10;

/// How long `acquire` waits for a free slot.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Pool sizing and timeouts.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool_size: usize,
    pub max_overflow: usize,
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    /// Hard upper bound on live physical connections.
    pub fn max_connections(&self) -> usize {
        self.pool_size + self.max_overflow
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// Shared, bounded connection pool. Cloning is cheap and shares the pool.
pub struct Pool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    slots: Arc<Semaphore>,
    state: Mutex<PoolState<M::Connection>>,
    next_id: AtomicU64,
    created_at: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    /// Live physical connections: idle + checked out + being opened.
    open: usize,
    checked_out: usize,
    metrics: PoolMetricsInner,
}

struct IdleConnection<C> {
    id: u64,
    conn: C,
}

#[derive(Debug, Default)]
struct PoolMetricsInner {
    opened: u64,
    discarded: u64,
    checkouts: u64,
    timeouts: u64,
}

impl<M: ConnectionManager> Pool<M> {
    /// Create a pool. No connection is opened until the first `acquire`.
    pub fn new(manager: M, config: PoolConfig) -> Self {
        tracing::info!(
            pool_size = config.pool_size,
            max_overflow = config.max_overflow,
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            schema = manager.schema(),
            "connection pool created"
        );

        let inner = Arc::new(PoolInner {
            slots: Arc::new(Semaphore::new(config.max_connections())),
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(config.pool_size),
                open: 0,
                checked_out: 0,
                metrics: PoolMetricsInner::default(),
            }),
            next_id: AtomicU64::new(1),
            created_at: Instant::now(),
            manager,
            config,
        });

        Self { inner }
    }

    /// Check out a connection, waiting up to the acquire timeout for a slot.
    ///
    /// Reuses a healthy idle connection when one exists, otherwise opens a new
    /// one. Dropping the returned future at any point leaves no half-acquired
    /// connection behind.
    pub async fn acquire(&self) -> Result<PooledConnection<M>, DbError> {
        let timeout = self.inner.config.acquire_timeout;
        let permit =
            match tokio::time::timeout(timeout, Arc::clone(&self.inner.slots).acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(DbError::PoolClosed),
                Err(_) => {
                    let status = {
                        let mut state = self.inner.state.lock();
                        state.metrics.timeouts += 1;
                        self.inner.status_locked(&state)
                    };
                    tracing::warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        checked_out = status.checked_out,
                        max = status.max,
                        "connection pool exhausted"
                    );
                    return Err(DbError::PoolExhausted { timeout });
                }
            };

        if let Some(idle) = self.inner.take_idle() {
            tracing::trace!(connection_id = idle.id, "reusing idle connection");
            return Ok(PooledConnection::new(
                idle.id,
                idle.conn,
                Arc::clone(&self.inner),
                permit,
            ));
        }

        let reservation = self.inner.reserve()?;
        let conn = self.inner.manager.connect().await?;
        let id = reservation.complete();
        tracing::debug!(connection_id = id, "opened database connection");

        Ok(PooledConnection::new(
            id,
            conn,
            Arc::clone(&self.inner),
            permit,
        ))
    }

    /// Return a connection to the pool.
    ///
    /// A healthy connection goes back to idle (or is closed if it was an
    /// overflow connection). A broken one is discarded and reported as
    /// [`DbError::ConnectionBroken`]; the pool itself stays usable and the
    /// next `acquire` opens a replacement.
    pub fn release(&self, conn: PooledConnection<M>) -> Result<(), DbError> {
        let id = conn.id;
        let healthy = conn.reusable && !conn.is_broken();
        drop(conn);

        if healthy {
            Ok(())
        } else {
            Err(DbError::ConnectionBroken { id })
        }
    }

    /// Stop handing out connections and close the idle ones.
    pub fn close(&self) {
        self.inner.slots.close();
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.open -= drained.len();
            drained
        };
        tracing::info!(closed = drained.len(), "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.slots.is_closed()
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        self.inner.status_locked(&state)
    }

    pub fn metrics(&self) -> PoolMetrics {
        let state = self.inner.state.lock();
        PoolMetrics {
            opened: state.metrics.opened,
            discarded: state.metrics.discarded,
            checkouts: state.metrics.checkouts,
            timeouts: state.metrics.timeouts,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn schema(&self) -> &str {
        self.inner.manager.schema()
    }
}

impl<M: ConnectionManager> PoolInner<M> {
    fn status_locked(&self, state: &PoolState<M::Connection>) -> PoolStatus {
        PoolStatus {
            idle: state.idle.len(),
            checked_out: state.checked_out,
            open: state.open,
            max: self.config.max_connections(),
        }
    }

    /// Pop the first healthy idle connection, discarding broken ones on the way.
    fn take_idle(&self) -> Option<IdleConnection<M::Connection>> {
        let mut broken = Vec::new();
        let found = {
            let mut state = self.state.lock();
            let mut found = None;
            while let Some(idle) = state.idle.pop_front() {
                if idle.conn.is_broken() {
                    state.open -= 1;
                    state.metrics.discarded += 1;
                    broken.push(idle);
                    continue;
                }
                state.checked_out += 1;
                state.metrics.checkouts += 1;
                found = Some(idle);
                break;
            }
            found
        };

        for idle in broken {
            tracing::debug!(connection_id = idle.id, "discarding broken idle connection");
        }
        found
    }

    /// Reserve room for a new physical connection.
    fn reserve(&self) -> Result<Reservation<'_, M>, DbError> {
        let mut state = self.state.lock();
        if state.open >= self.config.max_connections() {
            return Err(DbError::PoolExhausted {
                timeout: self.config.acquire_timeout,
            });
        }
        state.open += 1;
        state.checked_out += 1;
        Ok(Reservation {
            pool: self,
            armed: true,
        })
    }

    fn put_back(&self, id: u64, conn: M::Connection, reusable: bool) {
        let healthy = reusable && !conn.is_broken();
        let mut state = self.state.lock();
        state.checked_out -= 1;

        if healthy && state.idle.len() < self.config.pool_size && !self.slots.is_closed() {
            state.idle.push_back(IdleConnection { id, conn });
            return;
        }

        state.open -= 1;
        if !healthy {
            state.metrics.discarded += 1;
        }
        drop(state);

        if healthy {
            tracing::trace!(connection_id = id, "closing overflow connection");
        } else {
            tracing::debug!(connection_id = id, "discarding broken connection");
        }
        drop(conn);
    }
}

/// Slot held while a new connection is being opened.
///
/// Undone on drop unless completed, so a failed or cancelled connect never
/// inflates the live count.
struct Reservation<'a, M: ConnectionManager> {
    pool: &'a PoolInner<M>,
    armed: bool,
}

impl<M: ConnectionManager> Reservation<'_, M> {
    fn complete(mut self) -> u64 {
        self.armed = false;
        let mut state = self.pool.state.lock();
        state.metrics.opened += 1;
        state.metrics.checkouts += 1;
        self.pool.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl<M: ConnectionManager> Drop for Reservation<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.pool.state.lock();
            state.open -= 1;
            state.checked_out -= 1;
        }
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub checked_out: usize,
    pub open: usize,
    pub max: usize,
}

/// Counters collected since the pool was created.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub opened: u64,
    pub discarded: u64,
    pub checkouts: u64,
    pub timeouts: u64,
    pub uptime: Duration,
}

/// A connection checked out of the pool.
///
/// Exclusively owned by one holder. Returned to the pool on drop.
pub struct PooledConnection<M: ConnectionManager> {
    id: u64,
    // Always `Some` until drop.
    conn: Option<M::Connection>,
    reusable: bool,
    pool: Arc<PoolInner<M>>,
    _permit: OwnedSemaphorePermit,
}

impl<M: ConnectionManager> PooledConnection<M> {
    fn new(
        id: u64,
        conn: M::Connection,
        pool: Arc<PoolInner<M>>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            id,
            conn: Some(conn),
            reusable: true,
            pool,
            _permit: permit,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Prevent this connection from returning to idle.
    pub fn discard(&mut self) {
        self.reusable = false;
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("pooled connection used after release")
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pooled connection used after release")
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(self.id, conn, self.reusable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::MemoryManager;
    use std::sync::atomic::AtomicUsize;

    fn small_pool(manager: &MemoryManager, pool_size: usize, max_overflow: usize) -> Pool<MemoryManager> {
        Pool::new(
            manager.clone(),
            PoolConfig {
                pool_size,
                max_overflow,
                acquire_timeout: Duration::from_secs(3),
            },
        )
    }

    #[tokio::test]
    async fn reuses_idle_connection() {
        let manager = MemoryManager::new();
        let pool = small_pool(&manager, 2, 0);

        let first = pool.acquire().await.expect("acquire");
        let id = first.id();
        pool.release(first).expect("healthy release");

        let second = pool.acquire().await.expect("acquire");
        assert_eq!(second.id(), id);
        assert_eq!(pool.metrics().opened, 1);
        assert_eq!(manager.opened(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_pool_size_plus_overflow() {
        let manager = MemoryManager::new();
        let pool = Pool::new(manager.clone(), PoolConfig::default());
        let held = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..120)
            .map(|i| {
                let pool = pool.clone();
                let held = Arc::clone(&held);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let conn = pool.acquire().await?;
                    let now = held.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2 + (i % 5) as u64)).await;
                    held.fetch_sub(1, Ordering::SeqCst);
                    drop(conn);
                    Ok::<_, DbError>(())
                })
            })
            .collect();

        for task in tasks {
            task.await.expect("task panicked").expect("acquire failed");
        }

        assert!(peak.load(Ordering::SeqCst) <= 30);
        assert!(manager.max_live() <= 30);
        let status = pool.status();
        assert_eq!(status.checked_out, 0);
        assert!(status.idle <= DEFAULT_POOL_SIZE);
        assert_eq!(status.open, status.idle);
        assert_eq!(status.max, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_times_out_without_leaking() {
        let manager = MemoryManager::new();
        let pool = small_pool(&manager, 1, 1);

        let a = pool.acquire().await.expect("first");
        let _b = pool.acquire().await.expect("second");

        let err = pool.acquire().await.err().expect("third must time out");
        assert!(matches!(err, DbError::PoolExhausted { .. }));

        let status = pool.status();
        assert_eq!(status.checked_out, 2);
        assert_eq!(status.open, 2);
        assert_eq!(pool.metrics().timeouts, 1);

        drop(a);
        let again = pool.acquire().await.expect("slot freed");
        assert_eq!(pool.status().checked_out, 2);
        drop(again);
    }

    #[tokio::test]
    async fn broken_connection_is_discarded_on_release() {
        let manager = MemoryManager::new();
        let pool = small_pool(&manager, 2, 0);

        let mut conn = pool.acquire().await.expect("acquire");
        conn.mark_broken();
        let err = pool.release(conn).err().expect("broken release reported");
        assert!(matches!(err, DbError::ConnectionBroken { .. }));

        let status = pool.status();
        assert_eq!(status.open, 0);
        assert_eq!(status.idle, 0);
        assert_eq!(manager.live(), 0);

        let replacement = pool.acquire().await.expect("replacement");
        assert!(!replacement.is_broken());
        assert_eq!(pool.metrics().opened, 2);
        assert_eq!(pool.metrics().discarded, 1);
    }

    #[tokio::test]
    async fn overflow_connections_close_on_release() {
        let manager = MemoryManager::new();
        let pool = small_pool(&manager, 1, 2);

        let conns = vec![
            pool.acquire().await.expect("1"),
            pool.acquire().await.expect("2"),
            pool.acquire().await.expect("3"),
        ];
        assert_eq!(manager.live(), 3);
        drop(conns);

        let status = pool.status();
        assert_eq!(status.idle, 1);
        assert_eq!(status.open, 1);
        assert_eq!(manager.live(), 1);
    }

    #[tokio::test]
    async fn failed_connect_releases_its_slot() {
        let manager = MemoryManager::new();
        manager.fail_connects(true);
        let pool = small_pool(&manager, 1, 0);

        let err = pool.acquire().await.err().expect("connect fails");
        assert!(matches!(err, DbError::Connect(_)));
        assert_eq!(pool.status().open, 0);
        assert_eq!(pool.status().checked_out, 0);

        manager.fail_connects(false);
        pool.acquire().await.expect("slot was returned");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_acquire_leaks_nothing() {
        let manager = MemoryManager::new();
        manager.set_connect_delay(Some(Duration::from_secs(1)));
        let pool = small_pool(&manager, 1, 0);

        let cancelled = tokio::time::timeout(Duration::from_millis(10), pool.acquire()).await;
        assert!(cancelled.is_err());

        let status = pool.status();
        assert_eq!(status.open, 0);
        assert_eq!(status.checked_out, 0);

        manager.set_connect_delay(None);
        pool.acquire().await.expect("permit was returned");
    }

    #[tokio::test]
    async fn closed_pool_refuses_checkouts() {
        let manager = MemoryManager::new();
        let pool = small_pool(&manager, 1, 0);
        drop(pool.acquire().await.expect("acquire"));

        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.status().open, 0);
        assert!(matches!(pool.acquire().await, Err(DbError::PoolClosed)));
    }
}
