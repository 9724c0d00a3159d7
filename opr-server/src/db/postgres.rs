//! Postgres connections via sqlx.
//!
//! Every connection is opened with:
//! - `sslmode=require` unless running in the `local` environment
//! - the configured `search_path`
//! - a server-enforced `statement_timeout`
//!
//! Each physical connect goes through the network audit: the resolved
//! addresses are recorded before connecting and the server address after.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgDatabaseError, PgSslMode};
use sqlx::{ConnectOptions, Row};

use super::error::{DbError, DriverFailure, FailureKind, SQLSTATE_QUERY_CANCELED};
use super::manager::{ConnectionManager, DbConnection};
use crate::config::{ConfigError, DbConfig};
use crate::net::{AuditSink, ConnectAudit, TracingSink};

/// Upper bound on establishing one physical connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Opens Postgres connections for one [`DbConfig`].
#[derive(Clone)]
pub struct PgConnectionManager {
    options: PgConnectOptions,
    schema: String,
    tls_required: bool,
    audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for PgConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnectionManager")
            .field("options", &self.options)
            .field("schema", &self.schema)
            .field("tls_required", &self.tls_required)
            .finish_non_exhaustive()
    }
}

impl PgConnectionManager {
    pub fn new(config: &DbConfig) -> Result<Self, ConfigError> {
        let mut options = PgConnectOptions::from_str(config.connection_string())
            .map_err(|_| ConfigError::InvalidConnectionString)?
            .options([
                ("search_path", config.schema().to_owned()),
                ("statement_timeout", config.statement_timeout_ms().to_string()),
            ]);

        let tls_required = !config.is_local();
        if tls_required {
            options = options.ssl_mode(PgSslMode::Require);
        }
        if config.hide_sql_parameter_logs() {
            options = options.disable_statement_logging();
        }

        Ok(Self {
            options,
            schema: config.schema().to_owned(),
            tls_required,
            audit: Arc::new(TracingSink),
        })
    }

    /// Send connect audit records to `sink` instead of the log.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn tls_required(&self) -> bool {
        self.tls_required
    }

    /// Host and port of the database server.
    pub fn endpoint(&self) -> (&str, u16) {
        (self.options.get_host(), self.options.get_port())
    }

    /// Unix socket connects bypass DNS and TCP, so they are not audited.
    fn audit_target(&self) -> Option<(&str, u16)> {
        if self.options.get_socket().is_some() {
            return None;
        }
        Some(self.endpoint())
    }
}

#[async_trait]
impl ConnectionManager for PgConnectionManager {
    type Connection = PgSessionConnection;

    async fn connect(&self) -> Result<PgSessionConnection, DbError> {
        let audit = match self.audit_target() {
            Some((host, port)) => {
                Some(ConnectAudit::resolve(Arc::clone(&self.audit), host, port).await)
            }
            None => None,
        };

        match tokio::time::timeout(CONNECT_TIMEOUT, self.options.connect()).await {
            Ok(Ok(mut inner)) => {
                if let Some(audit) = audit {
                    audit.connected(server_addr(&mut inner).await, None);
                }
                Ok(PgSessionConnection {
                    inner,
                    broken: false,
                })
            }
            Ok(Err(err)) => Err(DbError::Connect(capture(err))),
            Err(_) => Err(DbError::Connect(DriverFailure::message(
                FailureKind::ConnectTimeout,
                format!("connect timed out after {}s", CONNECT_TIMEOUT.as_secs()),
            ))),
        }
    }

    fn schema(&self) -> &str {
        &self.schema
    }
}

/// The address the server accepted this connection on, as the server sees it.
async fn server_addr(conn: &mut PgConnection) -> Option<SocketAddr> {
    let row: (Option<String>, Option<i32>) =
        match sqlx::query_as("SELECT host(inet_server_addr()), inet_server_port()")
            .fetch_one(&mut *conn)
            .await
        {
            Ok(row) => row,
            Err(err) => {
                tracing::debug!(error = %err, "could not read server address");
                return None;
            }
        };
    let ip: IpAddr = row.0?.parse().ok()?;
    let port = u16::try_from(row.1?).ok()?;
    Some(SocketAddr::new(ip, port))
}

/// A Postgres connection that remembers whether it has become unusable.
#[derive(Debug)]
pub struct PgSessionConnection {
    inner: PgConnection,
    broken: bool,
}

impl PgSessionConnection {
    /// Raw sqlx connection for typed queries.
    pub fn as_pg(&mut self) -> &mut PgConnection {
        &mut self.inner
    }

    fn track(&mut self, err: sqlx::Error) -> DbError {
        let failure = capture(err);
        if failure.kind().breaks_connection() {
            self.broken = true;
        }
        DbError::Driver(failure)
    }
}

#[async_trait]
impl DbConnection for PgSessionConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        match sqlx::Executor::execute(&mut self.inner, sqlx::raw_sql(sql)).await {
            Ok(done) => Ok(done.rows_affected()),
            Err(err) => Err(self.track(err)),
        }
    }

    async fn fetch_scalar(&mut self, sql: &str) -> Result<Option<i64>, DbError> {
        let row = match sqlx::query(sql).fetch_optional(&mut self.inner).await {
            Ok(row) => row,
            Err(err) => return Err(self.track(err)),
        };
        let Some(row) = row else {
            return Ok(None);
        };

        if let Ok(value) = row.try_get::<Option<i64>, _>(0) {
            return Ok(value);
        }
        match row.try_get::<Option<i32>, _>(0) {
            Ok(value) => Ok(value.map(i64::from)),
            Err(err) => Err(self.track(err)),
        }
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

/// Translate a sqlx error into a sanitized [`DriverFailure`].
///
/// Postgres reports row values in the `DETAIL` field; it is folded back into
/// the message text the way libpq renders it so the sanitizer strips it.
pub fn capture(err: sqlx::Error) -> DriverFailure {
    match &err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|code| code.into_owned());
            let kind = if code.as_deref() == Some(SQLSTATE_QUERY_CANCELED) {
                FailureKind::StatementTimeout
            } else {
                FailureKind::Database { code: code.clone() }
            };

            let mut text = db_err.message().to_owned();
            if let Some(detail) = db_err
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(PgDatabaseError::detail)
            {
                text.push_str("\nDETAIL:  ");
                text.push_str(detail);
            }

            let mut args = vec![Value::String(text)];
            if let Some(code) = code {
                args.push(Value::String(code));
            }
            DriverFailure::new(kind, args)
        }
        sqlx::Error::Io(io) => DriverFailure::message(FailureKind::Io, io.to_string()),
        sqlx::Error::Tls(tls) => DriverFailure::message(FailureKind::Tls, tls.to_string()),
        sqlx::Error::Protocol(msg) => DriverFailure::message(FailureKind::Protocol, msg.clone()),
        other => DriverFailure::message(FailureKind::Other, other.to_string()),
    }
}
