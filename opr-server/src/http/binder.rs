//! Session binder middleware.
//!
//! Every request gets its own [`Session`], stored in the request extensions
//! before the handler runs. Once the handler has produced a response the
//! session is closed, which rolls back anything uncommitted and returns the
//! connection to the pool. A close failure is logged and the response goes
//! out unchanged.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::HttpBody;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::{ConnectionManager, Session};
use crate::state::AppState;

/// The session of one unit of work, shared between binder and handler.
pub struct SessionSlot<M: ConnectionManager> {
    session: Arc<Mutex<Session<M>>>,
}

impl<M: ConnectionManager> Clone for SessionSlot<M> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<M: ConnectionManager> SessionSlot<M> {
    pub fn new(session: Session<M>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Exclusive access to the session until the guard drops.
    pub async fn lock(&self) -> OwnedMutexGuard<Session<M>> {
        Arc::clone(&self.session).lock_owned().await
    }
}

/// Abandons the session if the request is dropped before teardown runs.
struct Teardown<M: ConnectionManager> {
    slot: Option<SessionSlot<M>>,
}

impl<M: ConnectionManager> Teardown<M> {
    async fn run(mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let mut session = slot.lock().await;
        if let Err(err) = session.close().await {
            tracing::error!(error = %err, "failed to release database session");
        }
    }
}

impl<M: ConnectionManager> Drop for Teardown<M> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        tracing::warn!("request cancelled before session teardown");
        // if the handler still holds the lock, its guard drops the last
        // reference and the session abandons itself
        if let Ok(mut session) = slot.session.try_lock() {
            session.abandon();
        };
    }
}

/// Bind a session to the request, release it afterwards and write the access log.
pub async fn bind_session<M: ConnectionManager>(
    State(state): State<AppState<M>>,
    mut request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let slot = SessionSlot::new(state.db().session());
    request.extensions_mut().insert(slot.clone());
    let teardown = Teardown { slot: Some(slot) };

    let response = next.run(request).await;
    teardown.run().await;

    let length = response.body().size_hint().exact();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        remote_addr = ?remote_addr,
        response_length = length,
        content_type,
        latency_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
