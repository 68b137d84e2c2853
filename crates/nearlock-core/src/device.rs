//! Per-peripheral records and human-readable labelling.
//!
//! The engine keeps one explicit record per peripheral it cares about:
//! [`MonitoredTarget`] for members of the monitored set and
//! [`DiscoveredDevice`] for transient discovery-mode entries. Display names
//! are not cached on the records; [`display_label`] is a pure function over
//! a [`DeviceSnapshot`] of already-resolved attributes, re-derived whenever
//! a label is requested.

use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::sched::TimerToken;

/// Connection state of a peripheral as last reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// No connection and none in flight.
    Disconnected,
    /// A connection attempt is pending.
    Connecting,
    /// A live connection is held.
    Connected,
}

/// A member of the monitored set.
///
/// The target owns its expiry timers; tokens are cancelled before being
/// superseded so a stale timer can never fire for fresh state.
#[derive(Debug)]
pub struct MonitoredTarget {
    /// Stable peripheral identifier.
    pub id: Uuid,
    /// Connection state toward this target.
    pub link: LinkState,
    /// Whether the radio has sighted this target at least once (a
    /// connection can only be requested for sighted peripherals).
    pub sighted: bool,
    /// When the last successful connection-level RSSI read completed.
    pub last_read_at: Option<Instant>,
    /// Pending signal-loss timer.
    pub signal_timer: Option<TimerToken>,
    /// Pending connection-attempt timeout.
    pub connect_timer: Option<TimerToken>,
}

impl MonitoredTarget {
    /// Creates a fresh, unsighted target record.
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            link: LinkState::Disconnected,
            sighted: false,
            last_read_at: None,
            signal_timer: None,
            connect_timer: None,
        }
    }
}

/// A transient record for a peripheral seen in discovery mode.
#[derive(Debug)]
pub struct DiscoveredDevice {
    /// Peripheral identifier.
    pub id: Uuid,
    /// Most recently sighted RSSI.
    pub rssi: i16,
    /// Raw manufacturer advertisement payload from the first sighting.
    pub adv_data: Option<Vec<u8>>,
    /// Local name carried in the advertisement, if any.
    pub advertised_name: Option<String>,
    /// Manufacturer name resolved over the side connection.
    pub manufacturer: Option<String>,
    /// Model identifier resolved over the side connection.
    pub model: Option<String>,
    /// Name resolved from a platform identity cache, if any.
    pub resolved_name: Option<String>,
    /// MAC address resolved from a platform identity cache, if any.
    pub mac_address: Option<String>,
    /// Connection state of the identity side connection.
    pub link: LinkState,
    /// Pending removal timer.
    pub expiry_timer: Option<TimerToken>,
}

impl DiscoveredDevice {
    /// Creates a record for a first sighting.
    #[must_use]
    pub fn new(id: Uuid, rssi: i16, adv_data: Option<Vec<u8>>) -> Self {
        Self {
            id,
            rssi,
            adv_data,
            advertised_name: None,
            manufacturer: None,
            model: None,
            resolved_name: None,
            mac_address: None,
            link: LinkState::Disconnected,
            expiry_timer: None,
        }
    }

    /// Whether both identity characteristics have been resolved.
    #[must_use]
    pub fn identity_resolved(&self) -> bool {
        self.manufacturer.is_some() && self.model.is_some()
    }

    /// Immutable snapshot of this record for the listener, with the label
    /// derived from the current attributes.
    #[must_use]
    pub fn snapshot(&self) -> DeviceSnapshot {
        let mut snapshot = DeviceSnapshot {
            id: self.id,
            rssi: self.rssi,
            advertised_name: self.advertised_name.clone(),
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            resolved_name: self.resolved_name.clone(),
            mac_address: self.mac_address.clone(),
            adv_data: self.adv_data.clone(),
            label: String::new(),
        };
        snapshot.label = display_label(&snapshot);
        snapshot
    }
}

/// Resolved attributes of a discovered device, safe to hand to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    /// Peripheral identifier.
    pub id: Uuid,
    /// Most recently sighted RSSI.
    pub rssi: i16,
    /// Local name carried in the advertisement.
    pub advertised_name: Option<String>,
    /// Resolved manufacturer name.
    pub manufacturer: Option<String>,
    /// Resolved model identifier.
    pub model: Option<String>,
    /// Platform-resolved device name.
    pub resolved_name: Option<String>,
    /// Platform-resolved MAC address.
    pub mac_address: Option<String>,
    /// Raw manufacturer advertisement payload.
    #[serde(skip)]
    pub adv_data: Option<Vec<u8>>,
    /// Best-effort human-readable label.
    pub label: String,
}

/// Identity built from a platform-specific cache lookup.
#[derive(Debug, Clone, Default)]
pub struct ResolvedIdentity {
    /// Cached device name.
    pub name: Option<String>,
    /// Cached MAC address.
    pub mac_address: Option<String>,
}

/// Lookup into platform identity caches (an external collaborator).
///
/// Resolution is an explicit step invoked when a record is created, never
/// triggered implicitly by reading a label.
pub trait IdentityResolver: Send {
    /// Returns whatever identity the platform has cached for `id`.
    fn resolve(&self, id: Uuid) -> ResolvedIdentity;
}

/// Resolver for platforms without an identity cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIdentityResolver;

impl IdentityResolver for NoopIdentityResolver {
    fn resolve(&self, _id: Uuid) -> ResolvedIdentity {
        ResolvedIdentity::default()
    }
}

/// Friendly names for Apple model identifiers reported over the Device
/// Information service.
fn apple_model_name(model: &str) -> Option<&'static str> {
    let name = match model {
        "iPhone8,1" => "iPhone 6s",
        "iPhone8,2" => "iPhone 6s Plus",
        "iPhone8,4" => "iPhone SE",
        "iPhone9,1" | "iPhone9,3" => "iPhone 7",
        "iPhone9,2" | "iPhone9,4" => "iPhone 7 Plus",
        "iPhone10,1" | "iPhone10,4" => "iPhone 8",
        "iPhone10,2" | "iPhone10,5" => "iPhone 8 Plus",
        "iPhone10,3" | "iPhone10,6" => "iPhone X",
        "iPhone11,2" => "iPhone XS",
        "iPhone11,4" | "iPhone11,6" => "iPhone XS Max",
        "iPhone11,8" => "iPhone XR",
        "iPhone12,1" => "iPhone 11",
        "iPhone12,3" => "iPhone 11 Pro",
        "iPhone12,5" => "iPhone 11 Pro Max",
        "iPhone12,8" => "iPhone SE (2nd gen)",
        "iPhone13,1" => "iPhone 12 mini",
        "iPhone13,2" => "iPhone 12",
        "iPhone13,3" => "iPhone 12 Pro",
        "iPhone13,4" => "iPhone 12 Pro Max",
        "iPhone14,2" => "iPhone 13 Pro",
        "iPhone14,3" => "iPhone 13 Pro Max",
        "iPhone14,4" => "iPhone 13 mini",
        "iPhone14,5" => "iPhone 13",
        "Watch5,1" | "Watch5,2" | "Watch5,3" | "Watch5,4" => "Apple Watch Series 5",
        "Watch6,1" | "Watch6,2" | "Watch6,3" | "Watch6,4" => "Apple Watch Series 6",
        "iPad8,1" | "iPad8,2" | "iPad8,3" | "iPad8,4" => "iPad Pro 11\"",
        "AirPods1,1" => "AirPods",
        "AirPods2,1" => "AirPods (2nd gen)",
        _ => return None,
    };
    Some(name)
}

/// Combines manufacturer and model into a single hardware description.
fn hardware_name(snapshot: &DeviceSnapshot) -> Option<String> {
    match (&snapshot.manufacturer, &snapshot.model) {
        (Some(manufacturer), Some(model)) => {
            if manufacturer == "Apple Inc." {
                if let Some(friendly) = apple_model_name(model) {
                    return Some(friendly.to_string());
                }
            }
            Some(format!("{manufacturer}/{model}"))
        }
        (Some(manufacturer), None) => Some(manufacturer.clone()),
        (None, Some(model)) => Some(model.clone()),
        (None, None) => None,
    }
}

/// Decodes an iBeacon advertisement into a label with an estimated range.
fn ibeacon_label(adv: &[u8], rssi: i16) -> Option<String> {
    // Apple company identifier (004C, little endian) + type 0x02 + length 0x15,
    // then 16 bytes of proximity UUID, major, minor, and calibrated TX power.
    if adv.len() < 25 || adv[..4] != [0x4C, 0x00, 0x02, 0x15] {
        return None;
    }
    let major = u16::from_be_bytes([adv[20], adv[21]]);
    let minor = u16::from_be_bytes([adv[22], adv[23]]);
    #[allow(clippy::cast_possible_wrap)]
    let tx_power = adv[24] as i8;
    let distance = 10_f64.powf(f64::from(i16::from(tx_power) - rssi) / 20.0);
    Some(format!("iBeacon [{major}, {minor}] {distance:.1}m"))
}

/// Best-effort human-readable label for a device snapshot.
///
/// Fallback tiers: platform name combined with resolved hardware, hardware
/// alone, the advertised local name, iBeacon decoding of the raw
/// advertisement, MAC address, and finally the bare identifier.
#[must_use]
pub fn display_label(snapshot: &DeviceSnapshot) -> String {
    let hardware = hardware_name(snapshot);

    if let Some(name) = snapshot
        .resolved_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        return match hardware {
            Some(hw) if name.contains(hw.as_str()) => name.to_string(),
            Some(hw) if hw.contains(name) => hw,
            Some(hw) => format!("{name} - {hw}"),
            None => name.to_string(),
        };
    }

    if let Some(hw) = hardware {
        return hw;
    }

    if let Some(name) = snapshot
        .advertised_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        return name.to_string();
    }

    if let Some(label) = snapshot
        .adv_data
        .as_deref()
        .and_then(|adv| ibeacon_label(adv, snapshot.rssi))
    {
        return label;
    }

    if let Some(mac) = &snapshot.mac_address {
        return mac.clone();
    }

    snapshot.id.to_string()
}
