//! Configuration API endpoints.
//!
//! Settings changes are applied to the running engine first, then
//! persisted, so the API never reports a setting the engine is not
//! actually using.

use axum::extract::State;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::AppState;

use super::error::ApiResult;

/// Full configuration view.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "lock_rssi": -80,
    "unlock_rssi": -60,
    "discovery_rssi": -70,
    "proximity_timeout_secs": 5.0,
    "signal_timeout_secs": 60.0,
    "rssi_window": 5,
    "passive_mode": false,
    "monitored": ["f0a36dd5-4963-4b59-a7e3-77a2b2c10e8f"],
    "excluded": []
}))]
pub struct ConfigResponse {
    /// Presence threshold in dBm, or null when the unlock threshold
    /// gates both transitions.
    #[schema(example = -80, nullable)]
    pub lock_rssi: Option<i16>,

    /// Threshold a device must reach to count as close, in dBm.
    #[schema(example = -60)]
    pub unlock_rssi: i16,

    /// Minimum RSSI for a device to enter the discovery registry, in dBm.
    #[schema(example = -70)]
    pub discovery_rssi: i16,

    /// Debounce before the away transition is committed, in seconds.
    #[schema(example = 5.0)]
    pub proximity_timeout_secs: f64,

    /// Silence before a device's signal becomes unknown, in seconds.
    #[schema(example = 60.0)]
    pub signal_timeout_secs: f64,

    /// Number of samples in the RSSI smoothing window.
    #[schema(example = 5)]
    pub rssi_window: usize,

    /// Whether passive-only scanning is pinned.
    #[schema(example = false)]
    pub passive_mode: bool,

    /// Monitored device identifiers.
    pub monitored: Vec<Uuid>,

    /// Identifiers hidden from discovery.
    pub excluded: Vec<Uuid>,
}

/// Request body for updating presence thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "lock_rssi": -80,
    "unlock_rssi": -60
}))]
pub struct UpdateThresholdsRequest {
    /// New lock threshold in dBm, or null to let the unlock threshold
    /// gate both transitions.
    #[schema(example = -80, nullable)]
    pub lock_rssi: Option<i16>,

    /// New unlock threshold in dBm.
    #[schema(example = -60)]
    pub unlock_rssi: i16,
}

/// Request body for toggling passive mode.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "passive_mode": true }))]
pub struct UpdatePassiveModeRequest {
    /// Whether to pin passive-only scanning.
    pub passive_mode: bool,
}

/// Creates the settings router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_config))
        .route("/thresholds", put(update_thresholds))
        .route("/passive", put(update_passive_mode))
}

async fn config_response(state: &AppState) -> ConfigResponse {
    let config = state.config().await;
    ConfigResponse {
        lock_rssi: config.lock_rssi,
        unlock_rssi: config.unlock_rssi,
        discovery_rssi: config.discovery_rssi,
        proximity_timeout_secs: config.proximity_timeout_secs,
        signal_timeout_secs: config.signal_timeout_secs,
        rssi_window: config.rssi_window,
        passive_mode: config.passive_mode,
        monitored: config.monitored.clone(),
        excluded: config.excluded.clone(),
    }
}

/// Get the current configuration.
#[utoipa::path(
    get,
    path = "/api/config",
    tag = "config",
    operation_id = "getConfig",
    summary = "Get configuration",
    description = "Returns the complete persisted configuration.",
    responses(
        (status = 200, description = "Current configuration", body = ConfigResponse)
    )
)]
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(config_response(&state).await)
}

/// Update presence thresholds.
#[utoipa::path(
    put,
    path = "/api/config/thresholds",
    tag = "config",
    operation_id = "updateThresholds",
    summary = "Update presence thresholds",
    description = "Updates the lock/unlock RSSI thresholds, applies them to \
        the running engine, and persists the change. A null `lock_rssi` \
        makes the unlock threshold gate both transitions.",
    request_body = UpdateThresholdsRequest,
    responses(
        (status = 200, description = "Thresholds updated", body = ConfigResponse),
        (status = 422, description = "Thresholds failed validation", body = super::error::ErrorResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn update_thresholds(
    State(state): State<AppState>,
    Json(request): Json<UpdateThresholdsRequest>,
) -> ApiResult<Json<ConfigResponse>> {
    // Validate against the full config before touching the engine.
    {
        let mut candidate = state.config().await.clone();
        candidate.lock_rssi = request.lock_rssi;
        candidate.unlock_rssi = request.unlock_rssi;
        candidate.validate()?;
    }

    state
        .engine()
        .set_thresholds(request.lock_rssi, request.unlock_rssi)
        .await?;

    {
        let mut config = state.config_mut().await;
        config.lock_rssi = request.lock_rssi;
        config.unlock_rssi = request.unlock_rssi;
    }
    state.persist_config().await;

    Ok(Json(config_response(&state).await))
}

/// Toggle passive-only scanning.
#[utoipa::path(
    put,
    path = "/api/config/passive",
    tag = "config",
    operation_id = "updatePassiveMode",
    summary = "Toggle passive mode",
    description = "Enables or disables passive-only scanning. Enabling it \
        releases all device connections; presence then relies on broadcast \
        advertisements alone.",
    request_body = UpdatePassiveModeRequest,
    responses(
        (status = 200, description = "Passive mode updated", body = ConfigResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn update_passive_mode(
    State(state): State<AppState>,
    Json(request): Json<UpdatePassiveModeRequest>,
) -> ApiResult<Json<ConfigResponse>> {
    state
        .engine()
        .set_passive_mode(request.passive_mode)
        .await?;

    {
        let mut config = state.config_mut().await;
        config.passive_mode = request.passive_mode;
    }
    state.persist_config().await;

    Ok(Json(config_response(&state).await))
}
