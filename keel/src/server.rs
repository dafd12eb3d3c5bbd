//! One-call wiring of the default middleware stack and fixed endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    error_handling::HandleErrorLayer,
    extract::{DefaultBodyLimit, Request, State},
    http::{header::HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::IntoResponse,
    routing::get,
    Router,
};
use tower::{buffer::BufferLayer, limit::RateLimitLayer, load_shed::LoadShedLayer, ServiceBuilder};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{Config, Environment};
use crate::error;
use crate::http::{request_id::RequestId, security};
use crate::response::Reply;

/// State behind the fixed endpoints.
#[derive(Clone)]
pub struct AppState {
    started: Instant,
    environment: Environment,
}

/// Liveness endpoint. Cannot fail.
#[allow(clippy::unused_async)] // Required for Axum handler signature
async fn health(State(state): State<AppState>, request_id: RequestId) -> impl IntoResponse {
    Reply::ok(serde_json::json!({
        "uptime": state.started.elapsed().as_secs(),
        "environment": state.environment.as_str(),
    }))
    .message("Server is healthy")
    .request_id(request_id.value())
}

/// Readiness endpoint. Cannot fail.
#[allow(clippy::unused_async)] // Required for Axum handler signature
async fn ready() -> impl IntoResponse {
    Reply::ok(serde_json::json!({ "status": "ready" }))
}

/// Merge the caller's routes with the fixed endpoints and wire the
/// default middleware stack in one call.
///
/// Every optional layer is gated on its config section's `enabled` flag.
/// With rate limiting enabled this must run inside the Tokio runtime:
/// the admission queue spawns its worker task here.
#[must_use]
pub fn build_router(config: &Config, routes: Router) -> Router {
    let state = AppState {
        started: Instant::now(),
        environment: config.environment,
    };

    let fixed = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state);

    let mut app = routes.merge(fixed).fallback(error::not_found);

    // Router::layer wraps everything added so far, so layers attach
    // innermost-first and the last one ends up outermost.
    let environment = config.environment;
    app = app.layer(middleware::from_fn(move |request: Request, next: Next| {
        error::failure_envelope(environment, request, next)
    }));

    app = app.layer(DefaultBodyLimit::max(config.server.max_body_bytes));

    if config.compression.enabled {
        app = app.layer(CompressionLayer::new());
    }

    if config.cors.enabled {
        app = app.layer(
            CorsLayer::new()
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers(Any)
                .allow_origin(cors_policy(&config.cors.allowed_origins)),
        );
    }

    app = app.layer(CatchPanicLayer::custom(
        move |panic: Box<dyn std::any::Any + Send + 'static>| {
            error::render_panic(environment, panic)
        },
    ));

    if config.rate_limit.enabled {
        app = app.layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(error::overloaded))
                .layer(BufferLayer::new(config.rate_limit.queue_depth))
                .layer(LoadShedLayer::new())
                .layer(RateLimitLayer::new(
                    config.rate_limit.per_second,
                    Duration::from_secs(1),
                )),
        );
    }

    if config.security_headers.enabled {
        let headers = security::build_security_headers(&config.security_headers);
        app = app.layer(middleware::from_fn(move |request: Request, next: Next| {
            security::apply_security_headers(Arc::clone(&headers), request, next)
        }));
    }

    app = app.layer(TraceLayer::new_for_http());

    if config.request_id.enabled {
        let header = HeaderName::from_bytes(config.request_id.header.as_bytes())
            .unwrap_or(HeaderName::from_static("x-request-id"));
        app = app.layer(PropagateRequestIdLayer::new(header.clone()));
        app = app.layer(SetRequestIdLayer::new(header, MakeRequestUuid));
    }

    app
}

/// Origin policy for the CORS layer: explicit origins, wildcard, or nothing.
fn cors_policy(origins: &[String]) -> AllowOrigin {
    if origins.iter().any(|origin| origin == "*") {
        tracing::warn!("CORS configured to allow any origin - not recommended for production");
        AllowOrigin::any()
    } else if origins.is_empty() {
        tracing::info!(
            "CORS allowed origins not configured - cross-origin requests will be blocked"
        );
        AllowOrigin::list(Vec::<HeaderValue>::new())
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        tracing::info!(origins = ?origins, "CORS allowed origins configured");
        AllowOrigin::list(parsed)
    }
}

/// Bind and serve until ctrl-c.
///
/// # Errors
/// Returns an error if the bind address is invalid, the listener cannot
/// be bound, or the server fails while running.
pub async fn serve(config: Config, routes: Router) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = build_router(&config, routes);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        addr = %listener.local_addr()?,
        "keel server starting"
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
