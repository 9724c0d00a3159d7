//! JSON response envelope shared by every route.
//!
//! ```json
//! {"statusCode": 200, "message": "Success", "meta": {...}, "data": {...}}
//! ```
//!
//! Absent fields are omitted. The HTTP status always equals `statusCode`.

use std::collections::BTreeMap;
use std::convert::Infallible;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

/// One warning or error entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<BTreeMap<String, String>>,
}

impl ErrorDetail {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            field: None,
            value: None,
            extra: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagingMetaData {
    pub page_offset: u64,
    pub page_size: u64,
    pub total_records: u64,
    pub total_pages: u64,
    pub order_by: String,
    pub order_direction: String,
}

impl PagingMetaData {
    /// Paging block for one page; `total_pages` is derived.
    pub fn new(
        page_offset: u64,
        page_size: u64,
        total_records: u64,
        order_by: impl Into<String>,
        order_direction: impl Into<String>,
    ) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total_records.div_ceil(page_size)
        };
        Self {
            page_offset,
            page_size,
            total_records,
            total_pages,
            order_by: order_by.into(),
            order_direction: order_direction.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaData {
    pub resource: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paging: Option<PagingMetaData>,
}

/// Method, path and query string of the current request.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: String,
    pub resource: String,
    pub query: Option<BTreeMap<String, String>>,
}

impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let query = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
            .ok()
            .map(|Query(query)| query)
            .filter(|query| !query.is_empty());

        Ok(Self {
            method: parts.method.to_string(),
            resource: parts.uri.path().to_owned(),
            query,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<ErrorDetail>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorDetail>>,
}

impl Envelope {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self {
            status_code: StatusCode::OK.as_u16(),
            message: message.into(),
            meta: None,
            data: Some(data),
            warnings: None,
            errors: None,
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>, errors: Vec<ErrorDetail>) -> Self {
        Self {
            status_code: status.as_u16(),
            message: message.into(),
            meta: None,
            data: None,
            warnings: None,
            errors: Some(errors),
        }
    }

    pub fn with_paging(mut self, request: &RequestMeta, paging: PagingMetaData) -> Self {
        self = self.for_request(request);
        if let Some(meta) = self.meta.as_mut() {
            meta.paging = Some(paging);
        }
        self
    }

    /// Fill `meta.method` and `meta.resource` from the request.
    pub fn for_request(mut self, request: &RequestMeta) -> Self {
        match self.meta.as_mut() {
            Some(meta) => {
                meta.method = request.method.clone();
                meta.resource = request.resource.clone();
            }
            None => {
                self.meta = Some(MetaData {
                    resource: request.resource.clone(),
                    method: request.method.clone(),
                    query: request.query.clone(),
                    paging: None,
                })
            }
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}
