//! opr-server: data-access layer and JSON API for the OPR service
//!
//! Pools Postgres connections, binds one session to every request, wraps
//! units of work in transactions, strips sensitive detail from failures and
//! audits outbound network connections.

pub mod config;
pub mod db;
pub mod http;
pub mod net;
pub mod sanitize;
pub mod state;

pub use config::{ConfigError, DbConfig};
pub use db::{Database, DbError, PgConnectionManager, PoolConfig};
pub use http::{build_router, run_server, ApiError, ServerConfig, ServerError};
pub use state::AppState;
