//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `presence` - Presence status and the monitored device set
//! - `devices` - Device discovery and exclusions
//! - `settings` - Threshold and scanning configuration
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi as _;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

pub mod devices;
pub mod error;
pub mod health;
pub mod openapi;
pub mod presence;
pub mod settings;

// Re-export commonly used types
#[allow(unused_imports)]
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
#[allow(unused_imports)]
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /swagger-ui            - Interactive API documentation
/// /api
/// ├── /presence          - Aggregate presence status
/// ├── /monitored         - Monitored device set
/// ├── /devices           - Discovery registry and exclusions
/// ├── /discovery         - Discovery mode control
/// ├── /config            - Configuration management
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                // Presence status and monitored set
                .merge(presence::router())
                // Discovery registry and exclusions
                .merge(devices::router())
                // Configuration management
                .nest("/config", settings::router())
                // OpenAPI spec at /api/openapi.json
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
