//! Success envelopes and pagination metadata.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Pagination block derived from `(page, limit, total)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationMeta {
    /// `total_pages = ceil(total / limit)`; a zero limit counts as one
    /// for the division so the arithmetic stays total.
    #[must_use]
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        let total_pages = total.div_ceil(if limit == 0 { 1 } else { limit });
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<PaginationMeta>,
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    meta: Meta,
}

/// Success envelope builder.
///
/// `meta.timestamp` is minted when the response is rendered, not when
/// the data was produced.
#[derive(Debug)]
pub struct Reply<T> {
    status: StatusCode,
    data: T,
    message: Option<String>,
    request_id: Option<String>,
    pagination: Option<PaginationMeta>,
}

impl<T: Serialize> Reply<T> {
    /// A 200 envelope around `data`.
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            data,
            message: None,
            request_id: None,
            pagination: None,
        }
    }

    #[must_use]
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    #[must_use]
    pub fn pagination(mut self, pagination: PaginationMeta) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        let body = Envelope {
            success: true,
            data: self.data,
            message: self.message,
            meta: Meta {
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                request_id: self.request_id,
                pagination: self.pagination,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// 201 envelope for a freshly created resource.
pub fn created<T: Serialize>(data: T) -> Reply<T> {
    Reply::ok(data)
        .status(StatusCode::CREATED)
        .message("Resource created successfully")
}

/// 202 envelope for work accepted but not yet performed.
pub fn accepted<T: Serialize>(data: T) -> Reply<T> {
    Reply::ok(data)
        .status(StatusCode::ACCEPTED)
        .message("Request accepted for processing")
}

/// 200 envelope with pagination metadata.
pub fn paginated<T: Serialize>(data: Vec<T>, page: u64, limit: u64, total: u64) -> Reply<Vec<T>> {
    Reply::ok(data).pagination(PaginationMeta::new(page, limit, total))
}

/// 204 with an empty body; no envelope.
#[must_use]
pub fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}
