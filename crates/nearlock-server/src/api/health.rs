//! Health check API endpoint.
//!
//! Provides a simple health check endpoint for monitoring and load balancers.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::AppState;

use super::error::ApiResult;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "bluetooth_powered": true
}))]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Whether the Bluetooth adapter is powered on.
    #[schema(example = true)]
    pub bluetooth_powered: bool,
}

/// Creates the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
///
/// Returns basic service status information including version and
/// the radio power state.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns basic service status information. Use this endpoint \
        for load balancer health checks and monitoring.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let snapshot = state.engine().snapshot().await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bluetooth_powered: snapshot.powered,
    }))
}
