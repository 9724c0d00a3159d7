//! HTTP layer
//!
//! Axum server with:
//! - One database session per request (binder middleware)
//! - JSON response envelope for success and error
//! - Request tracing and an access log line per request
//! - Graceful shutdown

pub mod binder;
pub mod error;
pub mod extractors;
pub mod response;
pub mod routes;
pub mod server;

pub use binder::{bind_session, SessionSlot};
pub use error::ApiError;
pub use extractors::DbSession;
pub use response::{Envelope, ErrorDetail, MetaData, PagingMetaData, RequestMeta};
pub use server::{build_router, run_server, ServerConfig, ServerError};
