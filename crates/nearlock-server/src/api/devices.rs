//! Device discovery API endpoints.
//!
//! Discovery mode builds a transient registry of nearby advertisers so a
//! user can pick which device to monitor. Entries expire after a period
//! of radio silence; excluding a device hides it permanently.

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use nearlock_core::DeviceSnapshot;

use crate::state::AppState;

use super::error::ApiResult;

/// One device in the discovery registry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "f0a36dd5-4963-4b59-a7e3-77a2b2c10e8f",
    "label": "iPhone X",
    "rssi": -62,
    "manufacturer": "Apple Inc.",
    "model": "iPhone10,3",
    "mac_address": null
}))]
pub struct DeviceDto {
    /// Peripheral identifier, stable for the process lifetime.
    pub id: Uuid,

    /// Best available display label.
    #[schema(example = "iPhone X")]
    pub label: String,

    /// Most recently sighted RSSI in dBm.
    #[schema(example = -62)]
    pub rssi: i16,

    /// Manufacturer name, if resolved over a side connection.
    #[schema(nullable)]
    pub manufacturer: Option<String>,

    /// Model identifier, if resolved over a side connection.
    #[schema(nullable)]
    pub model: Option<String>,

    /// MAC address, if the platform exposes one.
    #[schema(nullable)]
    pub mac_address: Option<String>,
}

impl From<DeviceSnapshot> for DeviceDto {
    fn from(snapshot: DeviceSnapshot) -> Self {
        Self {
            id: snapshot.id,
            label: snapshot.label,
            rssi: snapshot.rssi,
            manufacturer: snapshot.manufacturer,
            model: snapshot.model,
            mac_address: snapshot.mac_address,
        }
    }
}

/// Discovery registry response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DevicesResponse {
    /// Whether discovery mode is currently active.
    #[schema(example = true)]
    pub discovery_active: bool,

    /// Devices currently in the registry, strongest signal first.
    pub devices: Vec<DeviceDto>,
}

/// Response after a discovery mode change.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "discovery_active": true }))]
pub struct DiscoveryResponse {
    /// Whether discovery mode is now active.
    pub discovery_active: bool,
}

/// Response after excluding a device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "excluded": "f0a36dd5-4963-4b59-a7e3-77a2b2c10e8f" }))]
pub struct ExcludeResponse {
    /// The identifier that was excluded.
    pub excluded: Uuid,
}

/// Creates the devices router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/{id}", delete(exclude_device))
        .route("/discovery/start", post(start_discovery))
        .route("/discovery/stop", post(stop_discovery))
}

/// List the discovery registry.
#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "devices",
    operation_id = "listDevices",
    summary = "List discovered devices",
    description = "Returns the transient registry built while discovery mode \
        is active. Devices disappear automatically after a period of radio \
        silence.",
    responses(
        (status = 200, description = "Current discovery registry", body = DevicesResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn list_devices(State(state): State<AppState>) -> ApiResult<Json<DevicesResponse>> {
    let snapshot = state.engine().snapshot().await?;
    let mut devices: Vec<DeviceDto> = snapshot.devices.into_iter().map(DeviceDto::from).collect();
    devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    Ok(Json(DevicesResponse {
        discovery_active: snapshot.discovery,
        devices,
    }))
}

/// Enter discovery mode.
#[utoipa::path(
    post,
    path = "/api/discovery/start",
    tag = "devices",
    operation_id = "startDiscovery",
    summary = "Start device discovery",
    description = "Begins populating the device registry from broadcast \
        advertisements. New devices above the discovery threshold get a \
        short-lived side connection to resolve their manufacturer and model.",
    responses(
        (status = 200, description = "Discovery mode active", body = DiscoveryResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn start_discovery(State(state): State<AppState>) -> ApiResult<Json<DiscoveryResponse>> {
    state.engine().start_discovery().await?;
    Ok(Json(DiscoveryResponse {
        discovery_active: true,
    }))
}

/// Leave discovery mode.
#[utoipa::path(
    post,
    path = "/api/discovery/stop",
    tag = "devices",
    operation_id = "stopDiscovery",
    summary = "Stop device discovery",
    description = "Stops discovery and drops the transient registry.",
    responses(
        (status = 200, description = "Discovery mode inactive", body = DiscoveryResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn stop_discovery(State(state): State<AppState>) -> ApiResult<Json<DiscoveryResponse>> {
    state.engine().stop_discovery().await?;
    Ok(Json(DiscoveryResponse {
        discovery_active: false,
    }))
}

/// Permanently exclude a device from discovery.
#[utoipa::path(
    delete,
    path = "/api/devices/{id}",
    tag = "devices",
    operation_id = "excludeDevice",
    summary = "Exclude a device from discovery",
    description = "Removes the device from the registry and hides it from \
        all future discovery sessions. The exclusion is persisted to the \
        configuration file.",
    params(
        ("id" = Uuid, Path, description = "Peripheral identifier to exclude")
    ),
    responses(
        (status = 200, description = "Device excluded", body = ExcludeResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn exclude_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExcludeResponse>> {
    state.engine().exclude_device(id).await?;

    {
        let mut config = state.config_mut().await;
        if !config.excluded.contains(&id) {
            config.excluded.push(id);
        }
    }
    state.persist_config().await;

    Ok(Json(ExcludeResponse { excluded: id }))
}
