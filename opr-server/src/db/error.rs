//! Database error types
//!
//! Every failure raised by a driver is captured as a [`DriverFailure`] and
//! sanitized in the same step, so nothing downstream (logs, responses,
//! rollback handling) can observe the unsanitized text.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::sanitize::{sanitize_args, Sanitize};

/// SQLSTATE raised by Postgres when `statement_timeout` cancels a statement.
pub const SQLSTATE_QUERY_CANCELED: &str = "57014";

/// Coarse classification of a driver failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The server rejected the statement. Carries the SQLSTATE when known.
    Database { code: Option<String> },
    /// The server-side statement timeout fired.
    StatementTimeout,
    /// Socket-level failure.
    Io,
    /// TLS negotiation or transport failure.
    Tls,
    /// The wire protocol got out of sync.
    Protocol,
    /// Establishing the connection timed out.
    ConnectTimeout,
    /// Anything else the driver reports.
    Other,
}

impl FailureKind {
    /// Whether a connection that produced this failure must not be reused.
    pub fn breaks_connection(&self) -> bool {
        matches!(self, Self::Io | Self::Tls | Self::Protocol)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database { .. } => "database",
            Self::StatementTimeout => "statement_timeout",
            Self::Io => "io",
            Self::Tls => "tls",
            Self::Protocol => "protocol",
            Self::ConnectTimeout => "connect_timeout",
            Self::Other => "other",
        }
    }
}

/// A low-level failure reported by the driver.
///
/// `args` are the positional message arguments of the failure. Textual
/// arguments are truncated at the `DETAIL` marker when the failure is built.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverFailure {
    kind: FailureKind,
    args: Vec<Value>,
    sanitized: bool,
}

impl DriverFailure {
    /// Capture a failure, sanitizing its arguments.
    pub fn new(kind: FailureKind, args: Vec<Value>) -> Self {
        Self {
            kind,
            args,
            sanitized: false,
        }
        .sanitize()
    }

    /// Capture a failure with a single text argument.
    pub fn message(kind: FailureKind, text: impl Into<String>) -> Self {
        Self::new(kind, vec![Value::String(text.into())])
    }

    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn is_sanitized(&self) -> bool {
        self.sanitized
    }
}

impl Sanitize for DriverFailure {
    fn sanitize(mut self) -> Self {
        if !self.sanitized {
            self.args = sanitize_args(std::mem::take(&mut self.args));
            self.sanitized = true;
        }
        self
    }
}

impl fmt::Display for DriverFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arg in &self.args {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            match arg {
                Value::String(text) => f.write_str(text)?,
                other => write!(f, "{}", other)?,
            }
        }
        Ok(())
    }
}

/// Errors raised along the pool and session path.
#[derive(Debug, Error)]
pub enum DbError {
    /// No connection became free within the acquisition timeout.
    #[error("connection pool exhausted: no connection available within {timeout:?}")]
    PoolExhausted { timeout: Duration },

    #[error("connection pool is closed")]
    PoolClosed,

    /// A connection failed its health check when returned to the pool.
    #[error("connection {id} is broken and was discarded")]
    ConnectionBroken { id: u64 },

    /// Opening a physical connection failed.
    #[error("failed to connect to database: {0}")]
    Connect(DriverFailure),

    /// A statement or transaction command failed.
    #[error("database failure ({}): {0}", .0.kind().as_str())]
    Driver(DriverFailure),

    /// Session accessor used outside a bound unit of work.
    #[error("no database session available in unit of work")]
    SessionMissing,

    #[error("database session is closed")]
    SessionClosed,
}

impl DbError {
    /// Stable name of the error kind, safe to expose to clients.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::PoolExhausted { .. } => "PoolExhausted",
            Self::PoolClosed => "PoolClosed",
            Self::ConnectionBroken { .. } => "ConnectionBroken",
            Self::Connect(_) => "DatabaseUnavailable",
            Self::Driver(_) => "TransactionFailure",
            Self::SessionMissing => "SessionMissing",
            Self::SessionClosed => "SessionClosed",
        }
    }

    /// Fixed client-facing description. Never contains driver text.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::PoolExhausted { .. } => "no database connection available",
            Self::PoolClosed => "database pool is shut down",
            Self::ConnectionBroken { .. } => "database connection lost",
            Self::Connect(_) => "database is unreachable",
            Self::Driver(_) => "database operation failed",
            Self::SessionMissing => "no database session bound to request",
            Self::SessionClosed => "database session already closed",
        }
    }

    /// Whether the caller may retry once the database recovers.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::PoolClosed | Self::Connect(_)
        )
    }
}

impl Sanitize for DbError {
    fn sanitize(self) -> Self {
        match self {
            Self::Connect(failure) => Self::Connect(failure.sanitize()),
            Self::Driver(failure) => Self::Driver(failure.sanitize()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_is_sanitized_on_construction() {
        let failure = DriverFailure::new(
            FailureKind::Database {
                code: Some("23505".into()),
            },
            vec![json!("insert failed DETAIL: Key (ssn)=(123-45-6789)"), json!(7)],
        );
        assert!(failure.is_sanitized());
        assert_eq!(failure.args(), &[json!("insert failed"), json!(7)]);
        assert_eq!(failure.to_string(), "insert failed, 7");
    }

    #[test]
    fn sanitizing_keeps_the_kind() {
        let err = DbError::Driver(DriverFailure::message(
            FailureKind::StatementTimeout,
            "canceling statement due to statement timeout DETAIL: select * from secrets",
        ));
        let err = err.sanitize();
        match &err {
            DbError::Driver(failure) => {
                assert_eq!(failure.kind(), &FailureKind::StatementTimeout);
                assert_eq!(
                    failure.to_string(),
                    "canceling statement due to statement timeout"
                );
            }
            other => panic!("unexpected error kind: {other:?}"),
        }
        assert_eq!(err.kind_name(), "TransactionFailure");
    }

    #[test]
    fn public_message_hides_driver_text() {
        let err = DbError::Connect(DriverFailure::message(
            FailureKind::Io,
            "could not connect to postgres://opr:secret123@db:5432/opr",
        ));
        assert!(!err.public_message().contains("secret123"));
        assert!(err.is_unavailable());
    }

    #[test]
    fn broken_kinds() {
        assert!(FailureKind::Io.breaks_connection());
        assert!(!FailureKind::StatementTimeout.breaks_connection());
        assert!(!FailureKind::Database { code: None }.breaks_connection());
    }
}
