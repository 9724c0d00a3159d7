//! In-memory connection manager for tests.
//!
//! Understands a tiny command language instead of SQL:
//! `BEGIN`, `COMMIT`, `ROLLBACK`, `SET <key> <value>`, `GET <key>`,
//! `SELECT 1`, `FAIL <message>` (server error) and `BREAK` (dropped socket).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error::{DbError, DriverFailure, FailureKind};
use super::manager::{ConnectionManager, DbConnection};

#[derive(Clone, Default)]
pub(crate) struct MemoryManager {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    committed: Mutex<HashMap<String, i64>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    opened: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    fail_connect: AtomicBool,
    fail_rollback: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
}

impl MemoryManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_connects(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_rollbacks(&self, fail: bool) {
        self.shared.fail_rollback.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.shared.connect_delay.lock() = delay;
    }

    pub(crate) fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub(crate) fn rollbacks(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    pub(crate) fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub(crate) fn max_live(&self) -> usize {
        self.shared.max_live.load(Ordering::SeqCst)
    }

    pub(crate) fn committed(&self, key: &str) -> Option<i64> {
        self.shared.committed.lock().get(key).copied()
    }
}

#[async_trait]
impl ConnectionManager for MemoryManager {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, DbError> {
        let delay = *self.shared.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.shared.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::Connect(DriverFailure::message(
                FailureKind::Io,
                "could not connect to server: Connection refused DETAIL: host=db.internal user=opr",
            )));
        }

        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(MemoryConnection {
            shared: Arc::clone(&self.shared),
            pending: None,
            broken: false,
        })
    }

    fn schema(&self) -> &str {
        "public"
    }
}

pub(crate) struct MemoryConnection {
    shared: Arc<Shared>,
    pending: Option<HashMap<String, i64>>,
    broken: bool,
}

impl MemoryConnection {
    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }

    fn lookup(&self, key: &str) -> Option<i64> {
        self.pending
            .as_ref()
            .and_then(|pending| pending.get(key).copied())
            .or_else(|| self.shared.committed.lock().get(key).copied())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DbConnection for MemoryConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        if self.broken {
            return Err(DbError::Driver(DriverFailure::message(
                FailureKind::Io,
                "connection already closed",
            )));
        }

        let sql = sql.trim().trim_end_matches(';');
        let mut parts = sql.splitn(3, ' ');
        match parts.next().unwrap_or_default() {
            "BEGIN" => {
                self.pending = Some(HashMap::new());
                Ok(0)
            }
            "COMMIT" => {
                if let Some(pending) = self.pending.take() {
                    self.shared.committed.lock().extend(pending);
                }
                self.shared.commits.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            }
            "ROLLBACK" => {
                if self.shared.fail_rollback.load(Ordering::SeqCst) {
                    self.broken = true;
                    return Err(DbError::Driver(DriverFailure::message(
                        FailureKind::Io,
                        "server closed the connection unexpectedly",
                    )));
                }
                self.pending = None;
                self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            }
            "SET" => {
                let key = parts.next().unwrap_or_default().to_owned();
                let value = parts.next().and_then(|v| v.parse().ok()).unwrap_or_default();
                match self.pending.as_mut() {
                    Some(pending) => {
                        pending.insert(key, value);
                    }
                    None => {
                        self.shared.committed.lock().insert(key, value);
                    }
                }
                Ok(1)
            }
            "FAIL" => {
                let rest = sql.strip_prefix("FAIL").unwrap_or_default().trim();
                Err(DbError::Driver(DriverFailure::message(
                    FailureKind::Database {
                        code: Some("23505".into()),
                    },
                    rest,
                )))
            }
            "BREAK" => {
                self.broken = true;
                Err(DbError::Driver(DriverFailure::message(
                    FailureKind::Io,
                    "server closed the connection unexpectedly",
                )))
            }
            _ => Ok(0),
        }
    }

    async fn fetch_scalar(&mut self, sql: &str) -> Result<Option<i64>, DbError> {
        let sql = sql.trim().trim_end_matches(';');
        if sql == "SELECT 1" {
            return Ok(Some(1));
        }
        match sql.strip_prefix("GET ") {
            Some(key) => Ok(self.lookup(key.trim())),
            None => Ok(None),
        }
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}
