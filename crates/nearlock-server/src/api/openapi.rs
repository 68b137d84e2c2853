//! OpenAPI specification generation for the nearlock API.
//!
//! This module generates an OpenAPI 3.0 specification consumed by the
//! Swagger UI served at `/swagger-ui` and by client generators.

use axum::Json;
use utoipa::OpenApi;

// Import all the handler modules to reference their types
use super::devices::{DeviceDto, DevicesResponse, DiscoveryResponse, ExcludeResponse};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::presence::{
    PresenceResponse, SetMonitoredRequest, SetMonitoredResponse, TargetStatusDto,
};
use super::settings::{ConfigResponse, UpdatePassiveModeRequest, UpdateThresholdsRequest};

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json` and returns the complete
/// OpenAPI 3.0 specification for the nearlock API.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a string (for writing to file).
/// Used by the gen-openapi binary.
#[allow(dead_code)]
pub fn get_openapi_json() -> String {
    ApiDoc::openapi()
        .to_pretty_json()
        .expect("Failed to serialize OpenAPI spec")
}

/// Main OpenAPI document structure for nearlock.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "nearlock API",
        version = "0.1.0",
        description = r#"
# nearlock API

nearlock watches for the proximity of trusted Bluetooth LE devices and
exposes an aggregate presence flag a lock agent can act on.

## Overview

1. **Presence**: the engine smooths RSSI readings from monitored devices
   and reports `present: true` while at least one is within the configured
   threshold. The away transition is debounced so brief signal dips do not
   lock the session.
2. **Discovery**: a transient registry of nearby advertisers, used to pick
   which device to monitor. Devices expire after a period of radio silence.
3. **Configuration**: thresholds, passive-only scanning, and the monitored
   set are all persisted to a TOML file.

## Design notes

- Presence transitions are pushed as engine notifications; polling
  `/api/presence` returns the same state on demand.
- Discovery side connections exist only to resolve a device's
  manufacturer and model, and are released as soon as both are known.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local nearlock server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks and service status"
        ),
        (
            name = "presence",
            description = "Aggregate presence flag and monitored device status"
        ),
        (
            name = "devices",
            description = "Bluetooth device discovery for onboarding"
        ),
        (
            name = "config",
            description = "Threshold, scanning, and monitored-set configuration"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Presence endpoints
        super::presence::get_presence,
        super::presence::set_monitored,
        // Device endpoints
        super::devices::list_devices,
        super::devices::start_discovery,
        super::devices::stop_discovery,
        super::devices::exclude_device,
        // Config endpoints
        super::settings::get_config,
        super::settings::update_thresholds,
        super::settings::update_passive_mode,
    ),
    components(schemas(
        ErrorResponse,
        HealthResponse,
        PresenceResponse,
        TargetStatusDto,
        SetMonitoredRequest,
        SetMonitoredResponse,
        DeviceDto,
        DevicesResponse,
        DiscoveryResponse,
        ExcludeResponse,
        ConfigResponse,
        UpdateThresholdsRequest,
        UpdatePassiveModeRequest,
    ))
)]
pub struct ApiDoc;
