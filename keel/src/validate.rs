//! Request-section validation middleware.
//!
//! A [`ValidationLayer`] checks one or more sections of a request (body,
//! query, params, headers) against their schemas in a single pass,
//! collecting every violation from every failing section before
//! responding. Valid sections are replaced with their normalized values:
//! the body in place, the other sections through a request extension read
//! by the [`ValidatedQuery`], [`ValidatedParams`], and
//! [`ValidatedHeaders`] extractors.
//!
//! Attach with [`axum::Router::route_layer`] so matched path parameters
//! are available:
//!
//! ```ignore
//! use keel::schema::{self, Source};
//! use keel::validate::{ValidationLayer, ValidationSet};
//!
//! let app = Router::new()
//!     .route("/users/{id}", put(update_user))
//!     .route_layer(ValidationLayer::new(
//!         ValidationSet::new()
//!             .params(schema::of::<UserPath>())
//!             .body(schema::of::<UpdateUser>()),
//!     ));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{FromRequestParts, RawPathParams, Request},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        request::Parts,
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tower::{Layer, Service};

use crate::error::{AppError, Fault};
use crate::schema::{Schema, SchemaError, Source, Violation};

/// Bodies under validation are buffered; anything larger is rejected
/// upstream by the orchestrator's body limit, this is the hard ceiling.
const MAX_VALIDATED_BODY: usize = 2 * 1024 * 1024;

/// Insertion-ordered mapping of request sections to schemas.
///
/// Aggregation order across sections follows the order schemas were
/// attached; at most one schema applies per section (the last one wins).
#[derive(Clone, Default)]
pub struct ValidationSet {
    entries: Vec<(Source, Arc<dyn Schema>)>,
}

impl ValidationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a schema to a section.
    #[must_use]
    pub fn source(mut self, source: Source, schema: impl Schema) -> Self {
        self.entries.retain(|(existing, _)| *existing != source);
        self.entries.push((source, Arc::new(schema)));
        self
    }

    #[must_use]
    pub fn body(self, schema: impl Schema) -> Self {
        self.source(Source::Body, schema)
    }

    #[must_use]
    pub fn query(self, schema: impl Schema) -> Self {
        self.source(Source::Query, schema)
    }

    #[must_use]
    pub fn params(self, schema: impl Schema) -> Self {
        self.source(Source::Params, schema)
    }

    #[must_use]
    pub fn headers(self, schema: impl Schema) -> Self {
        self.source(Source::Headers, schema)
    }

    fn wants(&self, source: Source) -> bool {
        self.entries.iter().any(|(s, _)| *s == source)
    }
}

/// Normalized section values produced by a [`ValidationLayer`].
#[derive(Debug, Clone, Default)]
pub struct NormalizedSections(Arc<HashMap<Source, Value>>);

impl NormalizedSections {
    #[must_use]
    pub fn get(&self, source: Source) -> Option<&Value> {
        self.0.get(&source)
    }
}

/// Route-level validation middleware.
#[derive(Clone)]
pub struct ValidationLayer {
    set: Arc<ValidationSet>,
}

impl ValidationLayer {
    #[must_use]
    pub fn new(set: ValidationSet) -> Self {
        Self { set: Arc::new(set) }
    }

    /// Validate a single section.
    #[must_use]
    pub fn single(source: Source, schema: impl Schema) -> Self {
        Self::new(ValidationSet::new().source(source, schema))
    }
}

impl<S> Layer<S> for ValidationLayer {
    type Service = ValidationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidationService {
            inner,
            set: Arc::clone(&self.set),
        }
    }
}

/// The service produced by [`ValidationLayer`].
#[derive(Clone)]
pub struct ValidationService<S> {
    inner: S,
    set: Arc<ValidationSet>,
}

impl<S> Service<Request> for ValidationService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let set = Arc::clone(&self.set);
        // Take the service that was polled ready; leave the clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match apply(&set, request).await {
                Ok(request) => inner.call(request).await,
                Err(response) => Ok(response),
            }
        })
    }
}

/// Run every schema in the set against its section. `Ok` carries the
/// request with normalized sections installed; `Err` carries the
/// response to send instead (a 400 short-circuit or a classified fault).
async fn apply(set: &ValidationSet, request: Request) -> Result<Request, Response> {
    let (mut parts, original_body) = request.into_parts();

    let mut body_bytes: Option<Bytes> = None;
    let mut passthrough_body: Option<Body> = None;
    if set.wants(Source::Body) {
        match to_bytes(original_body, MAX_VALIDATED_BODY).await {
            Ok(bytes) => body_bytes = Some(bytes),
            // Transport failure, not a constraint violation: propagate.
            Err(err) => return Err(Fault::from(anyhow::Error::new(err)).into_response()),
        }
    } else {
        passthrough_body = Some(original_body);
    }

    let mut violations: Vec<Violation> = Vec::new();
    let mut normalized: HashMap<Source, Value> = HashMap::new();

    for (source, schema) in &set.entries {
        let value = match section_value(*source, &mut parts, body_bytes.as_ref()).await {
            Ok(value) => value,
            Err(violation) => {
                violations.push(violation.tagged(*source));
                continue;
            }
        };

        match schema.parse(&value) {
            Ok(value) => {
                normalized.insert(*source, value);
            }
            Err(SchemaError::Violations(list)) => {
                violations.extend(list.into_iter().map(|v| v.tagged(*source)));
            }
            Err(SchemaError::Internal(err)) => {
                return Err(Fault::from(err).into_response());
            }
        }
    }

    if !violations.is_empty() {
        return Err(rejection(violations));
    }

    if let Some(value) = normalized.get(&Source::Body) {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                parts
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                body_bytes = Some(Bytes::from(bytes));
            }
            Err(err) => return Err(Fault::from(anyhow::Error::new(err)).into_response()),
        }
    }

    parts.extensions.insert(NormalizedSections(Arc::new(normalized)));

    let body = body_bytes.map_or_else(
        || passthrough_body.unwrap_or_else(Body::empty),
        Body::from,
    );
    Ok(Request::from_parts(parts, body))
}

/// The section's current value as JSON. Absent sections default to an
/// empty object; only a malformed JSON body produces a violation here.
async fn section_value(
    source: Source,
    parts: &mut Parts,
    body: Option<&Bytes>,
) -> Result<Value, Violation> {
    match source {
        Source::Body => {
            let bytes = body.map(Bytes::as_ref).unwrap_or_default();
            if bytes.is_empty() {
                return Ok(Value::Object(Map::new()));
            }
            serde_json::from_slice(bytes).map_err(|err| {
                Violation::new("", format!("invalid JSON body: {err}"), "invalid_json")
            })
        }
        Source::Query => Ok(Value::Object(parse_query(
            parts.uri.query().unwrap_or_default(),
        ))),
        Source::Params => {
            let mut map = Map::new();
            if let Ok(params) = RawPathParams::from_request_parts(parts, &()).await {
                for (key, value) in params.iter() {
                    map.insert(key.to_owned(), Value::String(value.to_owned()));
                }
            }
            Ok(Value::Object(map))
        }
        Source::Headers => Ok(Value::Object(headers_value(&parts.headers))),
    }
}

/// Decode a query string into a string-valued JSON object. Duplicate
/// keys keep the last value; `+` means space.
fn parse_query(query: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        map.insert(decode_component(key), Value::String(decode_component(value)));
    }
    map
}

fn decode_component(raw: &str) -> String {
    let unplussed = raw.replace('+', " ");
    match urlencoding::decode(&unplussed) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => unplussed.clone(),
    }
}

/// Header map as a string-valued JSON object; repeated headers are
/// joined with ", ".
fn headers_value(headers: &HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();
    for key in headers.keys() {
        let joined = headers
            .get_all(key)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        map.insert(key.as_str().to_owned(), Value::String(joined));
    }
    map
}

/// The 400 short-circuit. Deliberately leaner than the classifier's
/// envelope: no `errorCode`, just the message and the violation list.
#[derive(Debug, Serialize)]
struct ValidationRejection {
    success: bool,
    message: &'static str,
    errors: Vec<Violation>,
}

fn rejection(errors: Vec<Violation>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ValidationRejection {
            success: false,
            message: "Validation failed",
            errors,
        }),
    )
        .into_response()
}

macro_rules! section_extractor {
    ($name:ident, $source:expr, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone)]
        pub struct $name<T>(pub T);

        impl<S, T> FromRequestParts<S> for $name<T>
        where
            S: Send + Sync,
            T: DeserializeOwned,
        {
            type Rejection = Fault;

            async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Fault> {
                let sections = parts.extensions.get::<NormalizedSections>().ok_or_else(|| {
                    Fault::from(AppError::internal(
                        "no normalized sections on this request; is the ValidationLayer installed on this route?",
                    ))
                })?;
                let value = sections
                    .get($source)
                    .ok_or_else(|| {
                        Fault::from(AppError::internal(format!(
                            "the {} section was not validated on this route",
                            $source
                        )))
                    })?
                    .clone();
                let data = serde_json::from_value(value).map_err(|err| {
                    Fault::from(AppError::internal(format!(
                        "normalized {} did not match the handler type: {err}",
                        $source
                    )))
                })?;
                Ok(Self(data))
            }
        }
    };
}

section_extractor!(
    ValidatedQuery,
    Source::Query,
    "Normalized query parameters produced by the route's `ValidationLayer`."
);
section_extractor!(
    ValidatedParams,
    Source::Params,
    "Normalized path parameters produced by the route's `ValidationLayer`."
);
section_extractor!(
    ValidatedHeaders,
    Source::Headers,
    "Normalized headers produced by the route's `ValidationLayer`."
);
