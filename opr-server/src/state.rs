//! Application state shared across handlers

use std::sync::Arc;

use crate::db::{ConnectionManager, Database};

/// Shared application state
pub struct AppState<M: ConnectionManager> {
    inner: Arc<AppStateInner<M>>,
}

struct AppStateInner<M: ConnectionManager> {
    db: Database<M>,
}

impl<M: ConnectionManager> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionManager> AppState<M> {
    pub fn new(db: Database<M>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { db }),
        }
    }

    pub fn db(&self) -> &Database<M> {
        &self.inner.db
    }
}
