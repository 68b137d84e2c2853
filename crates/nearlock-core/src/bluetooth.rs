//! btleplug-backed radio transport.
//!
//! Translates [`RadioCommand`]s into adapter calls and surfaces
//! [`CentralEvent`]s as [`RadioEvent`]s. btleplug addresses peripherals by
//! a platform-specific [`PeripheralId`]; this module keeps a bidirectional
//! map to the stable [`Uuid`]s the engine works with.
//!
//! Two platform caveats:
//! - There is no portable connected-link RSSI read, so `ReadRssi` is
//!   answered from the advertisement-derived RSSI in the peripheral's
//!   cached properties.
//! - Command failures (connect refusals, reads against vanished
//!   peripherals) surface as events or are dropped, matching the
//!   fire-and-forget command contract.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{NearlockError, Result};
use crate::events::{RadioCommand, RadioEvent};
use crate::runtime::RadioTransport;

/// Radio transport over the first available btleplug adapter.
pub struct BtleplugTransport {
    adapter: Adapter,
    events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    by_peripheral: HashMap<PeripheralId, Uuid>,
    by_uuid: HashMap<Uuid, PeripheralId>,
    pending: VecDeque<RadioEvent>,
}

impl BtleplugTransport {
    /// Connects to the platform Bluetooth stack and claims the first
    /// adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|err| NearlockError::ScanFailed(err.to_string()))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|err| NearlockError::ScanFailed(err.to_string()))?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(NearlockError::AdapterNotFound)?;
        let events = adapter
            .events()
            .await
            .map_err(|err| NearlockError::ScanFailed(err.to_string()))?;
        Ok(Self {
            adapter,
            events,
            by_peripheral: HashMap::new(),
            by_uuid: HashMap::new(),
            pending: VecDeque::new(),
        })
    }

    /// Stable engine identifier for a peripheral, minted on first sight.
    fn uuid_for(&mut self, id: &PeripheralId) -> Uuid {
        if let Some(existing) = self.by_peripheral.get(id) {
            return *existing;
        }
        // Platforms that already expose a UUID keep it; others get a
        // random one that stays stable for the process lifetime.
        let uuid = id
            .to_string()
            .parse::<Uuid>()
            .unwrap_or_else(|_| Uuid::new_v4());
        self.by_peripheral.insert(id.clone(), uuid);
        self.by_uuid.insert(uuid, id.clone());
        uuid
    }

    async fn peripheral(&mut self, id: Uuid) -> Option<btleplug::platform::Peripheral> {
        let peripheral_id = self.by_uuid.get(&id)?;
        self.adapter.peripheral(peripheral_id).await.ok()
    }

    async fn properties(&mut self, id: Uuid) -> Option<PeripheralProperties> {
        let peripheral = self.peripheral(id).await?;
        peripheral.properties().await.ok().flatten()
    }

    fn discovered_event(id: Uuid, properties: PeripheralProperties) -> Option<RadioEvent> {
        // Sightings without an RSSI carry no proximity signal.
        let rssi = properties.rssi?;
        let manufacturer_data = properties
            .manufacturer_data
            .iter()
            .next()
            .map(|(company, data)| {
                let mut raw = Vec::with_capacity(2 + data.len());
                raw.extend_from_slice(&company.to_le_bytes());
                raw.extend_from_slice(data);
                raw
            });
        Some(RadioEvent::Discovered {
            id,
            rssi,
            local_name: properties.local_name,
            manufacturer_data,
            services: properties.services,
        })
    }

    async fn translate(&mut self, event: CentralEvent) -> Option<RadioEvent> {
        match event {
            CentralEvent::StateUpdate(state) => match state {
                btleplug::api::CentralState::PoweredOn => Some(RadioEvent::PoweredOn),
                btleplug::api::CentralState::PoweredOff => Some(RadioEvent::PoweredOff),
                _ => None,
            },
            CentralEvent::DeviceDiscovered(peripheral_id)
            | CentralEvent::DeviceUpdated(peripheral_id) => {
                let id = self.uuid_for(&peripheral_id);
                let properties = self.properties(id).await?;
                Self::discovered_event(id, properties)
            }
            CentralEvent::DeviceConnected(peripheral_id) => {
                let id = self.uuid_for(&peripheral_id);
                Some(RadioEvent::Connected { id })
            }
            CentralEvent::DeviceDisconnected(peripheral_id) => {
                let id = self.uuid_for(&peripheral_id);
                Some(RadioEvent::Disconnected { id })
            }
            _ => None,
        }
    }
}

#[async_trait]
impl RadioTransport for BtleplugTransport {
    async fn next_event(&mut self) -> Option<RadioEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let central_event = self.events.next().await?;
            if let Some(event) = self.translate(central_event).await {
                return Some(event);
            }
        }
    }

    async fn execute(&mut self, command: RadioCommand) {
        match command {
            RadioCommand::StartScan => {
                if let Err(err) = self.adapter.start_scan(ScanFilter::default()).await {
                    warn!(%err, "failed to start scanning");
                }
            }
            RadioCommand::StopScan => {
                if let Err(err) = self.adapter.stop_scan().await {
                    warn!(%err, "failed to stop scanning");
                }
            }
            RadioCommand::Connect { id } => {
                let Some(peripheral) = self.peripheral(id).await else {
                    self.pending.push_back(RadioEvent::ConnectFailed { id });
                    return;
                };
                if let Err(err) = peripheral.connect().await {
                    debug!(%id, %err, "connect attempt failed");
                    self.pending.push_back(RadioEvent::ConnectFailed { id });
                }
            }
            RadioCommand::CancelConnect { id } => {
                if let Some(peripheral) = self.peripheral(id).await {
                    if let Err(err) = peripheral.disconnect().await {
                        debug!(%id, %err, "disconnect failed");
                    }
                }
            }
            RadioCommand::ReadRssi { id } => {
                if let Some(properties) = self.properties(id).await {
                    if let Some(rssi) = properties.rssi {
                        self.pending.push_back(RadioEvent::RssiRead { id, rssi });
                    }
                }
            }
            RadioCommand::DiscoverServices { id } => {
                let Some(peripheral) = self.peripheral(id).await else {
                    return;
                };
                if let Err(err) = peripheral.discover_services().await {
                    debug!(%id, %err, "service discovery failed");
                    return;
                }
                let services = peripheral
                    .services()
                    .into_iter()
                    .map(|service| service.uuid)
                    .collect();
                self.pending
                    .push_back(RadioEvent::ServicesDiscovered { id, services });
            }
            RadioCommand::DiscoverCharacteristics { id, service } => {
                let Some(peripheral) = self.peripheral(id).await else {
                    return;
                };
                let characteristics = peripheral
                    .services()
                    .into_iter()
                    .find(|candidate| candidate.uuid == service)
                    .map(|service| {
                        service
                            .characteristics
                            .into_iter()
                            .map(|characteristic| characteristic.uuid)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                if !characteristics.is_empty() {
                    self.pending.push_back(RadioEvent::CharacteristicsDiscovered {
                        id,
                        service,
                        characteristics,
                    });
                }
            }
            RadioCommand::ReadCharacteristic { id, characteristic } => {
                let Some(peripheral) = self.peripheral(id).await else {
                    return;
                };
                let target = peripheral
                    .characteristics()
                    .into_iter()
                    .find(|candidate| candidate.uuid == characteristic);
                let Some(target) = target else {
                    return;
                };
                match peripheral.read(&target).await {
                    Ok(value) => {
                        self.pending.push_back(RadioEvent::CharacteristicValue {
                            id,
                            characteristic,
                            value,
                        });
                    }
                    Err(err) => debug!(%id, %characteristic, %err, "characteristic read failed"),
                }
            }
        }
    }
}
