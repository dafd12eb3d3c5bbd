//! Request-scoped identifier plumbing.
//!
//! Identifier generation belongs to tower-http's `SetRequestIdLayer`
//! (wired by the setup orchestrator); this module only reads what that
//! collaborator assigned so handlers and envelopes can echo it.

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, Extensions, HeaderMap},
};

/// Default header carrying the request identifier.
pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";

/// Identifier assigned to the in-flight request, when one exists.
///
/// Extracting this never fails; requests processed without the
/// request-id layer simply carry no value.
#[derive(Debug, Clone, Default)]
pub struct RequestId(Option<String>);

impl RequestId {
    #[must_use]
    pub fn value(&self) -> Option<String> {
        self.0.clone()
    }

    #[must_use]
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Infallible> {
        Ok(Self(from_extensions_or_headers(
            &parts.extensions,
            &parts.headers,
        )))
    }
}

/// Read the identifier the request-id layer stored on the request.
pub(crate) fn from_extensions(extensions: &Extensions) -> Option<String> {
    extensions
        .get::<tower_http::request_id::RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .map(ToOwned::to_owned)
}

fn from_extensions_or_headers(extensions: &Extensions, headers: &HeaderMap) -> Option<String> {
    from_extensions(extensions).or_else(|| {
        headers
            .get(DEFAULT_REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned)
    })
}
