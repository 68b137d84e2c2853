//! Presence and monitoring API endpoints.
//!
//! Exposes the engine's aggregate presence flag, per-target signal status,
//! and replacement of the monitored device set.

use axum::extract::State;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use nearlock_core::runtime::EngineSnapshot;

use crate::state::AppState;

use super::error::ApiResult;

/// Signal status of one monitored target.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "f0a36dd5-4963-4b59-a7e3-77a2b2c10e8f",
    "rssi": -58,
    "active": true,
    "link": "connected"
}))]
pub struct TargetStatusDto {
    /// Monitored device identifier.
    pub id: Uuid,

    /// Smoothed RSSI estimate in dBm, or null when the signal is unknown.
    #[schema(example = -58, nullable)]
    pub rssi: Option<i16>,

    /// Whether readings currently come from active connection polling.
    #[schema(example = true)]
    pub active: bool,

    /// Connection state toward the target.
    #[schema(example = "connected")]
    pub link: String,
}

/// Presence status response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "present": true,
    "mode": "active-poll",
    "bluetooth_powered": true,
    "passive_mode": false,
    "targets": [{
        "id": "f0a36dd5-4963-4b59-a7e3-77a2b2c10e8f",
        "rssi": -58,
        "active": true,
        "link": "connected"
    }]
}))]
pub struct PresenceResponse {
    /// Whether any monitored device is currently considered close.
    #[schema(example = true)]
    pub present: bool,

    /// Current scanning mode: `idle`, `passive-scan`, or `active-poll`.
    #[schema(example = "active-poll")]
    pub mode: String,

    /// Whether the Bluetooth adapter is powered on.
    #[schema(example = true)]
    pub bluetooth_powered: bool,

    /// Whether passive-only scanning is pinned.
    #[schema(example = false)]
    pub passive_mode: bool,

    /// Per-target signal status.
    pub targets: Vec<TargetStatusDto>,
}

/// Request body for replacing the monitored device set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "device_ids": ["f0a36dd5-4963-4b59-a7e3-77a2b2c10e8f"]
}))]
pub struct SetMonitoredRequest {
    /// Identifiers of the devices to monitor. An empty list stops
    /// monitoring entirely.
    pub device_ids: Vec<Uuid>,
}

/// Response after replacing the monitored device set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "monitored": ["f0a36dd5-4963-4b59-a7e3-77a2b2c10e8f"]
}))]
pub struct SetMonitoredResponse {
    /// The monitored set now in effect.
    pub monitored: Vec<Uuid>,
}

impl From<EngineSnapshot> for PresenceResponse {
    fn from(snapshot: EngineSnapshot) -> Self {
        Self {
            present: snapshot.present,
            mode: snapshot.mode.to_string(),
            bluetooth_powered: snapshot.powered,
            passive_mode: snapshot.passive_mode,
            targets: snapshot
                .targets
                .into_iter()
                .map(|target| TargetStatusDto {
                    id: target.id,
                    rssi: target.rssi,
                    active: target.active,
                    link: serde_variant_name(target.link),
                })
                .collect(),
        }
    }
}

fn serde_variant_name(link: nearlock_core::LinkState) -> String {
    match link {
        nearlock_core::LinkState::Disconnected => "disconnected".to_string(),
        nearlock_core::LinkState::Connecting => "connecting".to_string(),
        nearlock_core::LinkState::Connected => "connected".to_string(),
    }
}

/// Creates the presence router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/presence", get(get_presence))
        .route("/monitored", put(set_monitored))
}

/// Current presence status.
#[utoipa::path(
    get,
    path = "/api/presence",
    tag = "presence",
    operation_id = "getPresence",
    summary = "Get presence status",
    description = "Returns the aggregate presence flag and the smoothed \
        signal status of every monitored device. `present` is true when at \
        least one monitored device is within the configured threshold.",
    responses(
        (status = 200, description = "Current presence status", body = PresenceResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn get_presence(State(state): State<AppState>) -> ApiResult<Json<PresenceResponse>> {
    let snapshot = state.engine().snapshot().await?;
    Ok(Json(PresenceResponse::from(snapshot)))
}

/// Replace the monitored device set.
#[utoipa::path(
    put,
    path = "/api/monitored",
    tag = "presence",
    operation_id = "setMonitored",
    summary = "Replace the monitored device set",
    description = "Replaces the set of devices whose proximity drives the \
        presence flag. Existing connections to devices no longer in the set \
        are released, and the change is persisted to the configuration file.",
    request_body = SetMonitoredRequest,
    responses(
        (status = 200, description = "Monitored set replaced", body = SetMonitoredResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn set_monitored(
    State(state): State<AppState>,
    Json(request): Json<SetMonitoredRequest>,
) -> ApiResult<Json<SetMonitoredResponse>> {
    state
        .engine()
        .set_monitored(request.device_ids.clone())
        .await?;

    {
        let mut config = state.config_mut().await;
        config.monitored = request.device_ids.clone();
    }
    state.persist_config().await;

    Ok(Json(SetMonitoredResponse {
        monitored: request.device_ids,
    }))
}
