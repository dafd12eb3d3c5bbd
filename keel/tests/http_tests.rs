//! HTTP integration tests for the default stack: fixed endpoints, CORS,
//! security headers, request ids, compression, rate limiting, and panic
//! capture, all driven through the production router wiring.

mod common;

use axum::{
    body::Body,
    http::{
        header::{
            ACCEPT_ENCODING, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_ENCODING,
            CONTENT_SECURITY_POLICY, ORIGIN, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
        },
        HeaderValue, Method, Request, StatusCode,
    },
    routing::get,
    Json, Router,
};
use common::{body_json, get as get_request, quiet_config};
use keel::server::build_router;
use tower::ServiceExt;

// =============================================================================
// Fixed endpoints
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_reports_uptime_and_environment() {
    let app = build_router(&quiet_config(), Router::new());

    let response = app
        .oneshot(get_request("/health"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], serde_json::json!(true));
    assert_eq!(body["message"], serde_json::json!("Server is healthy"));
    assert_eq!(
        body["data"]["environment"],
        serde_json::json!("development")
    );
    assert!(body["data"]["uptime"].is_u64());
    assert!(body["meta"]["timestamp"].is_string());
    // The request-id layer is on by default, so the envelope echoes one.
    assert!(body["meta"]["requestId"].is_string());
}

#[tokio::test]
async fn test_ready_endpoint_returns_minimal_envelope() {
    let app = build_router(&quiet_config(), Router::new());

    let response = app.oneshot(get_request("/ready")).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], serde_json::json!(true));
    assert_eq!(body["data"]["status"], serde_json::json!("ready"));
}

#[tokio::test]
async fn test_unmatched_route_returns_uniform_404_envelope() {
    let app = build_router(&quiet_config(), Router::new());

    let response = app
        .oneshot(get_request("/nonexistent"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], serde_json::json!(false));
    assert_eq!(body["errorCode"], serde_json::json!("NOT_FOUND"));
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("Route not found"));
    assert!(body["timestamp"].is_string());
}

// =============================================================================
// Request ids
// =============================================================================

#[tokio::test]
async fn test_request_id_is_assigned_and_propagated() {
    let app = build_router(&quiet_config(), Router::new());

    let response = app.oneshot(get_request("/health")).await.expect("response");

    let header_id = response
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .expect("request id response header");
    let body = body_json(response).await;
    assert_eq!(body["meta"]["requestId"], serde_json::json!(header_id));
}

#[tokio::test]
async fn test_client_supplied_request_id_is_kept() {
    let app = build_router(&quiet_config(), Router::new());

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "client-chosen-id")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(
        response.headers().get("x-request-id"),
        Some(&HeaderValue::from_static("client-chosen-id"))
    );
}

#[tokio::test]
async fn test_request_id_header_name_is_configurable() {
    let mut config = quiet_config();
    config.request_id.header = "x-correlation-id".to_string();
    let app = build_router(&config, Router::new());

    let response = app.oneshot(get_request("/health")).await.expect("response");

    assert!(response.headers().get("x-correlation-id").is_some());
    assert!(response.headers().get("x-request-id").is_none());
}

#[tokio::test]
async fn test_error_envelope_carries_the_request_id() {
    let app = build_router(&quiet_config(), Router::new());

    let response = app
        .oneshot(get_request("/nonexistent"))
        .await
        .expect("response");

    let body = body_json(response).await;
    assert!(body["requestId"].is_string());
}

// =============================================================================
// CORS
// =============================================================================

#[tokio::test]
async fn test_cors_allows_configured_origin() {
    let mut config = quiet_config();
    config.cors.allowed_origins = vec!["http://localhost:3000".to_string()];
    let app = build_router(&config, Router::new());

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/health")
                .header(ORIGIN, "http://localhost:3000")
                .header("Access-Control-Request-Method", "GET")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN),
        Some(&HeaderValue::from_static("http://localhost:3000"))
    );
}

#[tokio::test]
async fn test_cors_blocks_unconfigured_origin() {
    let mut config = quiet_config();
    config.cors.allowed_origins = vec!["http://localhost:3000".to_string()];
    let app = build_router(&config, Router::new());

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/health")
                .header(ORIGIN, "http://evil.com")
                .header("Access-Control-Request-Method", "GET")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert!(response
        .headers()
        .get(ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

// =============================================================================
// Security headers
// =============================================================================

#[tokio::test]
async fn test_security_headers_are_applied_to_responses() {
    let app = build_router(&quiet_config(), Router::new());

    let response = app.oneshot(get_request("/health")).await.expect("response");

    assert_eq!(
        response.headers().get(X_CONTENT_TYPE_OPTIONS),
        Some(&HeaderValue::from_static("nosniff"))
    );
    assert_eq!(
        response.headers().get(X_FRAME_OPTIONS),
        Some(&HeaderValue::from_static("DENY"))
    );
    assert!(response.headers().get(CONTENT_SECURITY_POLICY).is_some());
}

#[tokio::test]
async fn test_security_headers_cover_error_responses() {
    let app = build_router(&quiet_config(), Router::new());

    let response = app
        .oneshot(get_request("/nonexistent"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().get(X_CONTENT_TYPE_OPTIONS).is_some());
}

#[tokio::test]
async fn test_security_headers_can_be_disabled() {
    let mut config = quiet_config();
    config.security_headers.enabled = false;
    let app = build_router(&config, Router::new());

    let response = app.oneshot(get_request("/health")).await.expect("response");

    assert!(response.headers().get(X_CONTENT_TYPE_OPTIONS).is_none());
}

// =============================================================================
// Compression
// =============================================================================

#[tokio::test]
async fn test_responses_compress_when_requested() {
    let app = build_router(&quiet_config(), Router::new());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(ACCEPT_ENCODING, "gzip")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(
        response.headers().get(CONTENT_ENCODING),
        Some(&HeaderValue::from_static("gzip"))
    );
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test]
async fn test_overload_returns_one_429_envelope() {
    let mut config = quiet_config();
    config.rate_limit.enabled = true;
    config.rate_limit.per_second = 1;
    let app = build_router(&config, Router::new());

    let first = app
        .clone()
        .oneshot(get_request("/health"))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(get_request("/health"))
        .await
        .expect("response");
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(second).await;
    assert_eq!(body["success"], serde_json::json!(false));
    assert_eq!(body["errorCode"], serde_json::json!("RATE_LIMIT_EXCEEDED"));
}

// =============================================================================
// Panic capture
// =============================================================================

async fn boom() -> Json<serde_json::Value> {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_handler_panic_becomes_classified_500_envelope() {
    let routes = Router::new().route("/boom", get(boom));
    let app = build_router(&common::production_config(), routes);

    let response = app.oneshot(get_request("/boom")).await.expect("response");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["success"], serde_json::json!(false));
    assert_eq!(body["message"], serde_json::json!("Something went wrong"));
    assert!(body.get("stack").is_none());
}
