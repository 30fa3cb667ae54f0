use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Telemetry payloads are a handful of fields; anything bigger is abuse.
pub const INGEST_BODY_LIMIT: usize = 1024 * 1024;

/// Ingestion and dashboard read routes.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/metrics/chat",
            post(handlers::ingest_chat).layer(DefaultBodyLimit::max(INGEST_BODY_LIMIT)),
        )
        .route("/metrics/realtime", get(handlers::get_realtime))
        .route(
            "/metrics/health/leaderboard",
            get(handlers::get_health_leaderboard),
        )
        .route(
            "/metrics/provider/summary",
            get(handlers::get_provider_summary),
        )
        .route("/metrics/trends", get(handlers::get_trends))
        .route("/metrics", get(handlers::prometheus_metrics))
        .layer(TraceLayer::new_for_http())
}

/// CORS restricted to the dashboard origin plus local development hosts.
pub fn cors_layer(dashboard_origin: String) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _| {
                let origin_str = origin.to_str().unwrap_or("");
                origin_str == dashboard_origin
                    || origin_str.starts_with("http://localhost:")
                    || origin_str.starts_with("http://127.0.0.1:")
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("x-request-id"),
        ])
}
