//! Operational errors and centralized failure classification.
//!
//! Every failure that escapes a handler travels as a [`Fault`] and ends
//! at one place: the [`failure_envelope`] middleware installed by the
//! setup orchestrator. It classifies the failure, logs one structured
//! entry with the request context, and writes the uniform JSON error
//! envelope. Clients never see a bare stack trace or an HTML error page.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request},
    http::{StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    BoxError, Json,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::Environment;
use crate::http::request_id;
use crate::schema::Violation;

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ValidationError,
    RateLimitExceeded,
    InternalServerError,
    ServiceUnavailable,
    DatabaseError,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::DatabaseError => "DATABASE_ERROR",
        }
    }
}

/// Operational failure raised deliberately by application code.
///
/// Immutable after construction; the classifier passes its status, code,
/// message, and details through to the client untouched.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
    details: Option<Value>,
}

impl AppError {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::BadRequest, message)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized, message)
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, ErrorCode::Forbidden, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, message)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, ErrorCode::Conflict, message)
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::ValidationError, message)
    }

    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::RateLimitExceeded,
            message,
        )
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalServerError,
            message,
        )
    }

    #[must_use]
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ServiceUnavailable,
            message,
        )
    }

    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::DatabaseError,
            message,
        )
    }

    /// Attach structured details surfaced to the client alongside the
    /// message.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Schema-engine failure carrying the structured violation list.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Validation failed")]
pub struct SchemaViolations(pub Vec<Violation>);

/// Propagation wrapper funneling any failure to the central classifier.
///
/// Handlers return `Result<_, Fault>` and use `?`; anything convertible
/// to `anyhow::Error` converts to a `Fault`.
#[derive(Debug, Clone)]
pub struct Fault(Arc<anyhow::Error>);

impl Fault {
    #[must_use]
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl<E> From<E> for Fault
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(Arc::new(err.into()))
    }
}

impl IntoResponse for Fault {
    fn into_response(self) -> Response {
        // Render a safe (production-shaped) envelope. When the
        // orchestrator's failure_envelope middleware is installed it
        // re-renders with the real environment and request context.
        let classification = classify(self.inner(), Environment::Production);
        let status = classification.status;
        let body = ErrorBody::render(&classification, None, None);
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Outcome of classifying a failure.
#[derive(Debug, Clone)]
pub struct Classification {
    pub status: StatusCode,
    pub message: String,
    pub code: ErrorCode,
    pub details: Option<Value>,
}

fn find<T>(err: &anyhow::Error) -> Option<&T>
where
    T: std::error::Error + 'static,
{
    err.chain().find_map(|cause| cause.downcast_ref::<T>())
}

/// Map a failure to its client-facing status, message, code, and
/// details. Pure and total; rules are evaluated in priority order and
/// the first match wins.
#[must_use]
pub fn classify(err: &anyhow::Error, environment: Environment) -> Classification {
    if let Some(violations) = find::<SchemaViolations>(err) {
        return Classification {
            status: StatusCode::BAD_REQUEST,
            message: "Validation failed".to_string(),
            code: ErrorCode::ValidationError,
            details: serde_json::to_value(&violations.0).ok(),
        };
    }

    if let Some(app) = find::<AppError>(err) {
        return Classification {
            status: app.status,
            message: app.message.clone(),
            code: app.code,
            details: app.details.clone(),
        };
    }

    if find::<validator::ValidationErrors>(err).is_some() {
        return Classification {
            status: StatusCode::BAD_REQUEST,
            message: "Validation Error".to_string(),
            code: ErrorCode::ValidationError,
            details: None,
        };
    }

    if find::<jsonwebtoken::errors::Error>(err).is_some() {
        return Classification {
            status: StatusCode::UNAUTHORIZED,
            message: "Unauthorized".to_string(),
            code: ErrorCode::Unauthorized,
            details: None,
        };
    }

    if find::<uuid::Error>(err).is_some() {
        return Classification {
            status: StatusCode::BAD_REQUEST,
            message: "Invalid ID format".to_string(),
            code: ErrorCode::BadRequest,
            details: None,
        };
    }

    if let Some(db_err) = find::<sqlx::Error>(err) {
        match db_err {
            sqlx::Error::Database(database) if database.is_unique_violation() => {
                return Classification {
                    status: StatusCode::CONFLICT,
                    message: "Duplicate field value".to_string(),
                    code: ErrorCode::Conflict,
                    details: None,
                };
            }
            sqlx::Error::Database(_) => {
                return Classification {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Database error".to_string(),
                    code: ErrorCode::DatabaseError,
                    details: None,
                };
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                return Classification {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    message: "Service unavailable".to_string(),
                    code: ErrorCode::ServiceUnavailable,
                    details: None,
                };
            }
            _ => {}
        }
    }

    if let Some(io_err) = find::<std::io::Error>(err) {
        if io_err.kind() == std::io::ErrorKind::ConnectionRefused {
            return Classification {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "Service unavailable".to_string(),
                code: ErrorCode::ServiceUnavailable,
                details: None,
            };
        }
    }

    Classification {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: if environment.is_production() {
            "Something went wrong".to_string()
        } else {
            err.to_string()
        },
        code: ErrorCode::InternalServerError,
        details: None,
    }
}

/// The uniform error envelope.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    success: bool,
    message: String,
    #[serde(rename = "errorCode")]
    error_code: ErrorCode,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}

impl ErrorBody {
    pub(crate) fn render(
        classification: &Classification,
        request_id: Option<String>,
        stack: Option<String>,
    ) -> Self {
        Self {
            success: false,
            message: classification.message.clone(),
            error_code: classification.code,
            request_id,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            errors: classification.details.clone(),
            stack,
        }
    }
}

/// Centralized failure handler. Installed innermost by the setup
/// orchestrator so it sees every handler response while still holding
/// the request context for the log entry and the envelope.
pub(crate) async fn failure_envelope(
    environment: Environment,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let req_id = request_id::from_extensions(request.extensions());
    let client_addr = client_addr_of(&request);

    let response = next.run(request).await;
    let Some(fault) = response.extensions().get::<Fault>().cloned() else {
        return response;
    };

    let classification = classify(fault.inner(), environment);
    let chain = format!("{:#}", fault.inner());
    tracing::error!(
        status = classification.status.as_u16(),
        error_code = classification.code.as_str(),
        error_message = %classification.message,
        source = %chain,
        method = %method,
        path = %path,
        request_id = req_id.as_deref().unwrap_or("-"),
        client_addr = client_addr.as_deref().unwrap_or("-"),
        details = ?classification.details,
        "request failed"
    );

    let stack = (!environment.is_production()).then_some(chain);
    let body = ErrorBody::render(&classification, req_id, stack);
    (classification.status, Json(body)).into_response()
}

fn client_addr_of(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .or_else(|| {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(|value| value.trim().to_owned())
        })
}

/// Fallback for unmatched routes; feeds the same classifier as every
/// other failure so "not found" wears the uniform envelope.
pub async fn not_found(uri: Uri) -> Fault {
    AppError::not_found(format!("Route not found: {}", uri.path())).into()
}

/// Map overload errors from the admission stack to a 429 envelope.
pub(crate) async fn overloaded(err: BoxError) -> Response {
    if err.is::<tower::load_shed::error::Overloaded>() {
        tracing::warn!("request shed by rate limiter");
        let classification = Classification {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "Too many requests, please try again later".to_string(),
            code: ErrorCode::RateLimitExceeded,
            details: None,
        };
        let body = ErrorBody::render(&classification, None, None);
        return (classification.status, Json(body)).into_response();
    }

    tracing::error!(error = %err, "middleware stack failure");
    let classification = Classification {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "Something went wrong".to_string(),
        code: ErrorCode::InternalServerError,
        details: None,
    };
    let body = ErrorBody::render(&classification, None, None);
    (classification.status, Json(body)).into_response()
}

/// Render a caught handler panic as a classified 500 envelope.
pub(crate) fn render_panic(
    environment: Environment,
    panic: Box<dyn Any + Send + 'static>,
) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&'static str>().copied())
        .unwrap_or("panic with non-string payload");
    tracing::error!(panic_message = detail, "request handler panicked");

    let classification = Classification {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: if environment.is_production() {
            "Something went wrong".to_string()
        } else {
            detail.to_owned()
        },
        code: ErrorCode::InternalServerError,
        details: None,
    };
    let stack = (!environment.is_production()).then(|| detail.to_owned());
    let body = ErrorBody::render(&classification, None, stack);
    (classification.status, Json(body)).into_response()
}
