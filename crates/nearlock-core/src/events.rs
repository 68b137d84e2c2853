//! Inbound and outbound event surface of the engine.
//!
//! The radio subsystem notifies the engine through a single [`RadioEvent`]
//! enumeration consumed by one dispatch function, instead of scattering state
//! mutation across many callback entry points. The engine answers with
//! [`RadioCommand`]s (fire-and-forget requests to the radio) and
//! [`Notification`]s (presence and discovery updates for the listener).

use serde::Serialize;
use uuid::Uuid;

/// Builds a full 128-bit UUID from a 16-bit Bluetooth SIG short identifier.
const fn sig_uuid(short: u16) -> Uuid {
    // Bluetooth base UUID: 0000xxxx-0000-1000-8000-00805F9B34FB
    Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5F9B_34FB | (short as u128) << 96)
}

/// GATT Device Information service (`0x180A`).
pub const DEVICE_INFORMATION: Uuid = sig_uuid(0x180A);
/// Manufacturer Name String characteristic (`0x2A29`).
pub const MANUFACTURER_NAME: Uuid = sig_uuid(0x2A29);
/// Model Number String characteristic (`0x2A24`).
pub const MODEL_NUMBER: Uuid = sig_uuid(0x2A24);
/// Exposure Notification service (`0xFD6F`); advertisers are never listed in
/// discovery mode.
pub const EXPOSURE_NOTIFICATION: Uuid = sig_uuid(0xFD6F);

/// An asynchronous event delivered by the radio subsystem.
///
/// Completion events may arrive after the request that caused them was
/// cancelled; the engine tolerates those as no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// The adapter became available.
    PoweredOn,
    /// The adapter was switched off or went away.
    PoweredOff,
    /// A broadcast advertisement was sighted.
    Discovered {
        /// Peripheral identifier.
        id: Uuid,
        /// RSSI of the sighting, in dBm.
        rssi: i16,
        /// Local name carried in the advertisement, if any.
        local_name: Option<String>,
        /// Raw manufacturer advertisement payload, company identifier first.
        manufacturer_data: Option<Vec<u8>>,
        /// Service UUIDs carried in the advertisement.
        services: Vec<Uuid>,
    },
    /// A connection attempt completed.
    Connected {
        /// Peripheral identifier.
        id: Uuid,
    },
    /// A connection attempt failed.
    ConnectFailed {
        /// Peripheral identifier.
        id: Uuid,
    },
    /// A live connection dropped.
    Disconnected {
        /// Peripheral identifier.
        id: Uuid,
    },
    /// A connection-level signal-strength read completed.
    RssiRead {
        /// Peripheral identifier.
        id: Uuid,
        /// RSSI of the read, in dBm.
        rssi: i16,
    },
    /// Service discovery completed on a connected peripheral.
    ServicesDiscovered {
        /// Peripheral identifier.
        id: Uuid,
        /// Discovered service UUIDs.
        services: Vec<Uuid>,
    },
    /// Characteristic discovery completed for one service.
    CharacteristicsDiscovered {
        /// Peripheral identifier.
        id: Uuid,
        /// Service the characteristics belong to.
        service: Uuid,
        /// Discovered characteristic UUIDs.
        characteristics: Vec<Uuid>,
    },
    /// A characteristic value read completed.
    CharacteristicValue {
        /// Peripheral identifier.
        id: Uuid,
        /// Characteristic that was read.
        characteristic: Uuid,
        /// Raw value bytes.
        value: Vec<u8>,
    },
}

/// A fire-and-forget request from the engine to the radio subsystem.
///
/// Completion (if any) arrives later as a separate [`RadioEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    /// Begin broadcast scanning with duplicate reporting.
    StartScan,
    /// Stop broadcast scanning.
    StopScan,
    /// Open a connection to a peripheral.
    Connect {
        /// Peripheral identifier.
        id: Uuid,
    },
    /// Cancel a pending or live connection.
    CancelConnect {
        /// Peripheral identifier.
        id: Uuid,
    },
    /// Request a connection-level RSSI read.
    ReadRssi {
        /// Peripheral identifier.
        id: Uuid,
    },
    /// Discover services on a connected peripheral.
    DiscoverServices {
        /// Peripheral identifier.
        id: Uuid,
    },
    /// Discover characteristics of one service.
    DiscoverCharacteristics {
        /// Peripheral identifier.
        id: Uuid,
        /// Service to inspect.
        service: Uuid,
    },
    /// Read a characteristic value.
    ReadCharacteristic {
        /// Peripheral identifier.
        id: Uuid,
        /// Characteristic to read.
        characteristic: Uuid,
    },
}

/// Why an aggregate presence transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceReason {
    /// At least one monitored target came within the threshold.
    Close,
    /// Every monitored target stayed below the threshold for the full
    /// debounce interval.
    Away,
}

impl std::fmt::Display for PresenceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Close => f.write_str("close"),
            Self::Away => f.write_str("away"),
        }
    }
}

/// An update emitted by the engine for the external listener.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A previously unseen peripheral entered the discovery registry.
    NewDevice(crate::device::DeviceSnapshot),
    /// A registered peripheral was sighted again or resolved more identity.
    DeviceUpdated(crate::device::DeviceSnapshot),
    /// A registered peripheral expired or was excluded.
    DeviceRemoved(crate::device::DeviceSnapshot),
    /// A monitored target's smoothed signal changed.
    RssiUpdate {
        /// Target identifier.
        id: Uuid,
        /// Smoothed RSSI estimate, or `None` when the signal is unknown.
        rssi: Option<i16>,
        /// Whether the reading came from an active connection poll.
        active: bool,
    },
    /// The aggregate presence flag transitioned.
    Presence {
        /// New presence value.
        present: bool,
        /// Cause of the transition.
        reason: PresenceReason,
    },
    /// The adapter is powered off; emitted once per power-off.
    PowerWarning,
}
