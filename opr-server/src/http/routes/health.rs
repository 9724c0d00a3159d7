//! Health check endpoints

use axum::{routing::get, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;

use crate::db::ConnectionManager;
use crate::http::error::ApiError;
use crate::http::extractors::DbSession;
use crate::http::response::{Envelope, RequestMeta};
use crate::state::AppState;

pub const API_NAME: &str = "opr-api";
pub const API_VERSION: &str = "v1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: String,
    pub api_name: &'static str,
    pub api_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<serde_json::Value>,
}

impl HealthStatus {
    fn up() -> Self {
        Self {
            status: "up",
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            api_name: API_NAME,
            api_version: API_VERSION,
            components: None,
        }
    }
}

fn success(meta: &RequestMeta, status: HealthStatus) -> Result<Envelope, ApiError> {
    let data = serde_json::to_value(status).map_err(|err| ApiError::Internal {
        message: err.to_string(),
    })?;
    Ok(Envelope::success("Success", data).for_request(meta))
}

/// GET /v1/health
async fn health(meta: RequestMeta) -> Result<Envelope, ApiError> {
    success(&meta, HealthStatus::up())
}

/// GET /v1/health/deep - round trip to the database
async fn health_deep<M: ConnectionManager>(
    meta: RequestMeta,
    db: DbSession<M>,
) -> Result<Envelope, ApiError> {
    let mut session = db.lock().await;
    session
        .scope(|s| {
            Box::pin(async move {
                s.fetch_scalar("SELECT 1;").await?;
                Ok::<_, ApiError>(())
            })
        })
        .await?;

    let mut status = HealthStatus::up();
    status.components = Some(json!({"db": {"status": "up"}}));
    success(&meta, status)
}

/// Health routes
pub fn router<M: ConnectionManager>() -> Router<AppState<M>> {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/health/deep", get(health_deep::<M>))
}
