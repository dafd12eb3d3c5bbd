//! Shared helpers for integration tests.
//!
//! Builds routers through the production wiring in `keel::server` so
//! tests exercise the same stack `serve` runs.
#![allow(dead_code)] // not every test binary uses every helper

use axum::body::{to_bytes, Body};
use axum::http::Request;
use axum::response::Response;
use keel::config::{Config, Environment};

/// Config with admission control off so unrelated tests never trip the
/// rate limiter.
#[must_use]
pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.rate_limit.enabled = false;
    config
}

#[must_use]
pub fn production_config() -> Config {
    let mut config = quiet_config();
    config.environment = Environment::Production;
    config
}

/// Parse a JSON response body.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}

/// GET request with an empty body.
#[must_use]
pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

/// POST request with a JSON body.
#[must_use]
pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}
