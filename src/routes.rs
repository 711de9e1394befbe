//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod compat;
mod migration;
mod snapshot;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Standard success envelope
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    let cors = build_cors_layer(settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Snapshot routes
        .route(
            "/api/projects/{project_id}/snapshots",
            post(snapshot::create_snapshot).get(snapshot::list_snapshots),
        )
        .route(
            "/api/projects/{project_id}/snapshots/latest",
            get(snapshot::get_latest_snapshot),
        )
        .route(
            "/api/projects/{project_id}/snapshots/{version}",
            get(snapshot::get_snapshot),
        )
        // Artifact inspection
        .route(
            "/api/artifacts/{artifact_id}",
            get(snapshot::get_artifact),
        )
        // Migration routes
        .route(
            "/api/projects/{project_id}/migrations/plan",
            post(migration::plan_migration),
        )
        .route(
            "/api/projects/{project_id}/migrations/apply",
            post(migration::apply_migration),
        )
        // Compatibility routes
        .route(
            "/api/projects/{project_id}/normalize",
            post(compat::normalize_query),
        )
        .route(
            "/api/projects/{project_id}/results/virtualize",
            post(compat::virtualize_results),
        )
        .route(
            "/api/projects/{project_id}/compat/resolve",
            get(compat::resolve_name),
        )
        .route(
            "/api/projects/{project_id}/compat/{entity}",
            get(compat::result_mappings),
        )
        // Apply middleware and state
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [header::CONTENT_TYPE, header::ACCEPT];

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(3600))
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(3600))
    }
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
