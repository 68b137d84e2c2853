//! The proximity engine: scanning-mode control, presence derivation, and
//! discovery coordination.
//!
//! The engine is a deterministic state machine driven from a single control
//! loop. Inputs are [`RadioEvent`]s and timer firings; outputs are
//! [`RadioCommand`]s for the radio subsystem and [`Notification`]s for the
//! listener, collected in queues the driver drains after every dispatch.
//! All registries, windows, and timers are mutated only here, so there is
//! no locking anywhere in the core.
//!
//! Scanning strategy:
//! - `PassiveScan` listens for broadcast advertisements; it serves both
//!   discovery mode and first contact with monitored targets.
//! - `ActivePoll` holds live connections to monitored targets and requests
//!   an RSSI read every [`ACTIVE_POLL_INTERVAL`]. It is entered on the
//!   first successful connection-level read and abandoned for passive
//!   scanning as soon as any polled target goes [`ACTIVE_READ_STALENESS`]
//!   without a read.
//!
//! Reconnection is opportunistic: a lost target is retried on its next
//! broadcast sighting or poll tick, not on a backoff schedule, because
//! radio visibility itself gates whether a retry can succeed.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::device::{
    DeviceSnapshot, DiscoveredDevice, IdentityResolver, LinkState, MonitoredTarget,
    NoopIdentityResolver,
};
use crate::events::{
    Notification, PresenceReason, RadioCommand, RadioEvent, DEVICE_INFORMATION,
    EXPOSURE_NOTIFICATION, MANUFACTURER_NAME, MODEL_NUMBER,
};
use crate::rssi::RssiEstimator;
use crate::sched::{Scheduler, TimerKind, TimerToken};

/// How often connected targets are polled for an RSSI read.
pub const ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// How long a polled target may go without a successful read before the
/// controller falls back to passive scanning.
pub const ACTIVE_READ_STALENESS: Duration = Duration::from_secs(10);
/// How long a connection attempt may stay pending before it is cancelled.
pub const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Scanning strategy currently in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanMode {
    /// Radio session off; nothing monitored or discovered.
    Idle,
    /// Broadcast-listening only.
    PassiveScan,
    /// Live connections polled for RSSI at a fixed interval.
    ActivePoll,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::PassiveScan => f.write_str("passive-scan"),
            Self::ActivePoll => f.write_str("active-poll"),
        }
    }
}

/// Point-in-time view of one monitored target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetStatus {
    /// Target identifier.
    pub id: Uuid,
    /// Smoothed estimate, or `None` when the signal is unknown.
    pub rssi: Option<i16>,
    /// Whether readings currently come from active polling.
    pub active: bool,
    /// Connection state toward the target.
    pub link: LinkState,
}

/// The proximity/presence detection engine.
pub struct Engine {
    config: MonitorConfig,
    estimator: RssiEstimator,
    sched: Scheduler,
    resolver: Box<dyn IdentityResolver>,

    mode: ScanMode,
    scanning: bool,
    powered: bool,
    power_warned: bool,
    discovery: bool,

    presence: bool,
    exit_timer: Option<TimerToken>,
    poll_timer: Option<TimerToken>,
    active_since: Option<Instant>,

    monitored: HashMap<Uuid, MonitoredTarget>,
    discovered: HashMap<Uuid, DiscoveredDevice>,
    excluded: HashSet<Uuid>,

    commands: Vec<RadioCommand>,
    notifications: Vec<Notification>,
}

impl Engine {
    /// Creates an engine from a validated configuration, with no platform
    /// identity resolution.
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_resolver(config, Box::new(NoopIdentityResolver))
    }

    /// Creates an engine with a platform identity resolver for discovery
    /// labels.
    #[must_use]
    pub fn with_resolver(config: MonitorConfig, resolver: Box<dyn IdentityResolver>) -> Self {
        let estimator = RssiEstimator::new(config.rssi_window, config.absent_rssi());
        let excluded = config.excluded.iter().copied().collect();
        Self {
            config,
            estimator,
            sched: Scheduler::new(),
            resolver,
            mode: ScanMode::Idle,
            scanning: false,
            powered: false,
            power_warned: false,
            discovery: false,
            presence: false,
            exit_timer: None,
            poll_timer: None,
            active_since: None,
            monitored: HashMap::new(),
            discovered: HashMap::new(),
            excluded,
            commands: Vec::new(),
            notifications: Vec::new(),
        }
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Replaces the monitored set. Existing connections and timers are
    /// released; each new target gets a fresh signal-loss timer so that a
    /// target that never shows up is still reported as unknown.
    pub fn start_monitoring(&mut self, ids: Vec<Uuid>, now: Instant) {
        info!(count = ids.len(), "replacing monitored set");

        let old: Vec<Uuid> = self.monitored.keys().copied().collect();
        for id in old {
            if let Some(target) = self.monitored.remove(&id) {
                if target.link != LinkState::Disconnected {
                    self.commands.push(RadioCommand::CancelConnect { id });
                }
                if let Some(token) = target.signal_timer {
                    self.sched.cancel(token);
                }
                if let Some(token) = target.connect_timer {
                    self.sched.cancel(token);
                }
                self.estimator.remove(id);
            }
        }
        if let Some(token) = self.poll_timer.take() {
            self.sched.cancel(token);
        }
        if let Some(token) = self.exit_timer.take() {
            self.sched.cancel(token);
        }
        self.active_since = None;
        self.presence = false;

        for id in ids {
            self.monitored.insert(id, MonitoredTarget::new(id));
            self.reset_signal_timer(id, now);
        }

        if self.powered {
            if self.monitored.is_empty() && !self.discovery {
                self.mode = ScanMode::Idle;
                if self.scanning {
                    self.commands.push(RadioCommand::StopScan);
                    self.scanning = false;
                }
            } else {
                self.mode = ScanMode::PassiveScan;
                self.ensure_scanning();
            }
        }
    }

    /// Stops everything: releases connections, clears timers and the
    /// discovery registry, and turns the radio session off.
    pub fn stop(&mut self) {
        info!("stopping engine");
        for (id, target) in &self.monitored {
            if target.link != LinkState::Disconnected {
                self.commands.push(RadioCommand::CancelConnect { id: *id });
            }
        }
        for (id, device) in &self.discovered {
            if device.link != LinkState::Disconnected {
                self.commands.push(RadioCommand::CancelConnect { id: *id });
            }
        }
        for target in self.monitored.values_mut() {
            target.link = LinkState::Disconnected;
            target.signal_timer = None;
            target.connect_timer = None;
        }
        self.discovered.clear();
        self.discovery = false;
        self.sched.clear();
        self.exit_timer = None;
        self.poll_timer = None;
        self.active_since = None;
        self.presence = false;
        if self.scanning {
            self.commands.push(RadioCommand::StopScan);
            self.scanning = false;
        }
        self.mode = ScanMode::Idle;
    }

    /// Enables or disables passive-only scanning. Enabling it cancels all
    /// live connections and pins the controller to passive scanning.
    pub fn set_passive_mode(&mut self, passive: bool) {
        info!(passive, "passive mode changed");
        self.config.passive_mode = passive;
        if passive {
            if let Some(token) = self.poll_timer.take() {
                self.sched.cancel(token);
            }
            self.active_since = None;
            let connected: Vec<Uuid> = self
                .monitored
                .iter()
                .filter(|(_, target)| target.link != LinkState::Disconnected)
                .map(|(id, _)| *id)
                .collect();
            for id in connected {
                self.commands.push(RadioCommand::CancelConnect { id });
                if let Some(target) = self.monitored.get_mut(&id) {
                    target.link = LinkState::Disconnected;
                    if let Some(token) = target.connect_timer.take() {
                        self.sched.cancel(token);
                    }
                }
            }
            if self.mode == ScanMode::ActivePoll {
                self.mode = ScanMode::PassiveScan;
            }
        }
        self.ensure_scanning();
    }

    /// Enters discovery mode: broadcast sightings build the transient
    /// device registry until [`Engine::stop_discovery`].
    pub fn start_discovery(&mut self) {
        debug!("discovery mode on");
        self.discovery = true;
        if self.powered {
            if self.mode == ScanMode::Idle {
                self.mode = ScanMode::PassiveScan;
            }
            if !self.scanning {
                self.commands.push(RadioCommand::StartScan);
                self.scanning = true;
            }
        }
    }

    /// Leaves discovery mode and drops the transient registry, releasing
    /// any identity side connections.
    pub fn stop_discovery(&mut self) {
        debug!("discovery mode off");
        self.discovery = false;
        let ids: Vec<Uuid> = self.discovered.keys().copied().collect();
        for id in ids {
            if let Some(device) = self.discovered.remove(&id) {
                if let Some(token) = device.expiry_timer {
                    self.sched.cancel(token);
                }
                if device.link != LinkState::Disconnected {
                    self.commands.push(RadioCommand::CancelConnect { id });
                }
            }
        }
        if self.monitored.is_empty() {
            self.mode = ScanMode::Idle;
            if self.scanning {
                self.commands.push(RadioCommand::StopScan);
                self.scanning = false;
            }
        } else if self.mode == ScanMode::ActivePoll && self.scanning {
            // Broadcast scanning was only serving discovery.
            self.commands.push(RadioCommand::StopScan);
            self.scanning = false;
        }
    }

    /// Permanently hides a peripheral from discovery and removes any
    /// current registry entry.
    pub fn exclude_device(&mut self, id: Uuid) {
        info!(%id, "excluding device");
        self.excluded.insert(id);
        if !self.config.excluded.contains(&id) {
            self.config.excluded.push(id);
        }
        if let Some(device) = self.discovered.remove(&id) {
            if let Some(token) = device.expiry_timer {
                self.sched.cancel(token);
            }
            if device.link != LinkState::Disconnected {
                self.commands.push(RadioCommand::CancelConnect { id });
            }
            self.notifications
                .push(Notification::DeviceRemoved(device.snapshot()));
        }
    }

    /// Applies new presence thresholds and recomputes the aggregate flag.
    pub fn set_thresholds(&mut self, lock_rssi: Option<i16>, unlock_rssi: i16, now: Instant) {
        info!(?lock_rssi, unlock_rssi, "thresholds changed");
        self.config.lock_rssi = lock_rssi;
        self.config.unlock_rssi = unlock_rssi;
        self.estimator.set_absent_rssi(self.config.absent_rssi());
        self.update_presence(now);
    }

    // ========================================================================
    // Event dispatch
    // ========================================================================

    /// Consumes one radio event. All engine state transitions funnel
    /// through here and [`Engine::fire_due`].
    pub fn handle_event(&mut self, event: RadioEvent, now: Instant) {
        match event {
            RadioEvent::PoweredOn => self.on_powered_on(),
            RadioEvent::PoweredOff => self.on_powered_off(),
            RadioEvent::Discovered {
                id,
                rssi,
                local_name,
                manufacturer_data,
                services,
            } => self.on_discovered(id, rssi.min(0), local_name, manufacturer_data, &services, now),
            RadioEvent::Connected { id } => self.on_connected(id),
            RadioEvent::ConnectFailed { id } | RadioEvent::Disconnected { id } => {
                self.on_link_down(id);
            }
            RadioEvent::RssiRead { id, rssi } => self.on_rssi_read(id, rssi.min(0), now),
            RadioEvent::ServicesDiscovered { id, services } => {
                if self.discovered.contains_key(&id) && services.contains(&DEVICE_INFORMATION) {
                    self.commands.push(RadioCommand::DiscoverCharacteristics {
                        id,
                        service: DEVICE_INFORMATION,
                    });
                }
            }
            RadioEvent::CharacteristicsDiscovered {
                id,
                characteristics,
                ..
            } => {
                if self.discovered.contains_key(&id) {
                    for characteristic in characteristics {
                        if characteristic == MANUFACTURER_NAME || characteristic == MODEL_NUMBER {
                            self.commands
                                .push(RadioCommand::ReadCharacteristic { id, characteristic });
                        }
                    }
                }
            }
            RadioEvent::CharacteristicValue {
                id,
                characteristic,
                value,
            } => self.on_characteristic_value(id, characteristic, &value),
        }
    }

    /// Fires every timer due at or before `now`.
    pub fn fire_due(&mut self, now: Instant) {
        while let Some(kind) = self.sched.pop_due(now) {
            self.handle_timer(kind, now);
        }
    }

    /// Earliest pending timer deadline, for the driver's sleep.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.sched.next_deadline()
    }

    /// Drains the queued radio commands.
    pub fn take_commands(&mut self) -> Vec<RadioCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Drains the queued listener notifications.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Aggregate presence flag.
    #[must_use]
    pub fn presence(&self) -> bool {
        self.presence
    }

    /// Current scanning mode.
    #[must_use]
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Whether the adapter is powered on.
    #[must_use]
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Whether discovery mode is active.
    #[must_use]
    pub fn discovery_active(&self) -> bool {
        self.discovery
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Point-in-time status of every monitored target.
    #[must_use]
    pub fn target_statuses(&self) -> Vec<TargetStatus> {
        let active = self.mode == ScanMode::ActivePoll;
        let mut statuses: Vec<TargetStatus> = self
            .monitored
            .values()
            .map(|target| TargetStatus {
                id: target.id,
                rssi: self
                    .estimator
                    .has_samples(target.id)
                    .then(|| self.estimator.estimate(target.id)),
                active,
                link: target.link,
            })
            .collect();
        statuses.sort_by_key(|status| status.id);
        statuses
    }

    /// Snapshots of the current discovery registry.
    #[must_use]
    pub fn device_snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots: Vec<DeviceSnapshot> = self
            .discovered
            .values()
            .map(DiscoveredDevice::snapshot)
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    // ========================================================================
    // Radio event handlers
    // ========================================================================

    fn on_powered_on(&mut self) {
        info!("bluetooth powered on");
        self.powered = true;
        self.power_warned = false;
        if self.monitored.is_empty() && !self.discovery {
            self.mode = ScanMode::Idle;
        } else {
            self.mode = ScanMode::PassiveScan;
            self.ensure_scanning();
        }
    }

    /// Radio power loss is a global suspension: presence is forced absent
    /// without a transition event, every timer is cleared, and the listener
    /// is warned once until the next power-on.
    fn on_powered_off(&mut self) {
        warn!("bluetooth powered off");
        self.powered = false;
        self.scanning = false;
        self.mode = ScanMode::Idle;
        self.presence = false;
        self.sched.clear();
        self.exit_timer = None;
        self.poll_timer = None;
        self.active_since = None;
        for target in self.monitored.values_mut() {
            target.link = LinkState::Disconnected;
            target.sighted = false;
            target.last_read_at = None;
            target.signal_timer = None;
            target.connect_timer = None;
            self.estimator.clear(target.id);
        }
        self.discovered.clear();
        if !self.power_warned {
            self.power_warned = true;
            self.notifications.push(Notification::PowerWarning);
        }
    }

    fn on_discovered(
        &mut self,
        id: Uuid,
        rssi: i16,
        local_name: Option<String>,
        manufacturer_data: Option<Vec<u8>>,
        services: &[Uuid],
        now: Instant,
    ) {
        if let Some(target) = self.monitored.get_mut(&id) {
            target.sighted = true;
            if self.mode != ScanMode::ActivePoll {
                self.update_monitored(id, rssi, now);
                if !self.config.passive_mode {
                    self.connect_target(id, now);
                }
            }
        }

        if self.discovery {
            self.on_discovery_sighting(id, rssi, local_name, manufacturer_data, services, now);
        }
    }

    fn on_discovery_sighting(
        &mut self,
        id: Uuid,
        rssi: i16,
        local_name: Option<String>,
        manufacturer_data: Option<Vec<u8>>,
        services: &[Uuid],
        now: Instant,
    ) {
        if self.excluded.contains(&id) {
            return;
        }
        if services.contains(&EXPOSURE_NOTIFICATION) {
            return;
        }

        if let Some(device) = self.discovered.get_mut(&id) {
            device.rssi = rssi;
            if local_name.is_some() {
                device.advertised_name = local_name;
            }
            let snapshot = device.snapshot();
            self.notifications
                .push(Notification::DeviceUpdated(snapshot));
            self.reset_discovery_timer(id, now);
        } else if rssi >= self.config.discovery_rssi {
            info!(%id, rssi, "new device discovered");
            let identity = self.resolver.resolve(id);
            let mut device = DiscoveredDevice::new(id, rssi, manufacturer_data);
            device.advertised_name = local_name;
            device.resolved_name = identity.name;
            device.mac_address = identity.mac_address;
            // Best-effort side connection to resolve manufacturer/model.
            device.link = LinkState::Connecting;
            let snapshot = device.snapshot();
            self.discovered.insert(id, device);
            self.commands.push(RadioCommand::Connect { id });
            self.notifications.push(Notification::NewDevice(snapshot));
            self.reset_discovery_timer(id, now);
        }
    }

    fn on_connected(&mut self, id: Uuid) {
        if let Some(device) = self.discovered.get_mut(&id) {
            device.link = LinkState::Connected;
            self.commands.push(RadioCommand::DiscoverServices { id });
        }

        if let Some(target) = self.monitored.get_mut(&id) {
            if self.config.passive_mode {
                // Completion raced the passive switch: release it.
                target.link = LinkState::Disconnected;
                self.commands.push(RadioCommand::CancelConnect { id });
            } else {
                debug!(%id, "target connected");
                target.link = LinkState::Connected;
                if let Some(token) = target.connect_timer.take() {
                    self.sched.cancel(token);
                }
                self.commands.push(RadioCommand::ReadRssi { id });
            }
        }
    }

    fn on_link_down(&mut self, id: Uuid) {
        if let Some(target) = self.monitored.get_mut(&id) {
            target.link = LinkState::Disconnected;
            if let Some(token) = target.connect_timer.take() {
                self.sched.cancel(token);
            }
        }
        if let Some(device) = self.discovered.get_mut(&id) {
            device.link = LinkState::Disconnected;
        }
    }

    fn on_rssi_read(&mut self, id: Uuid, rssi: i16, now: Instant) {
        // Reads may complete for peripherals no longer monitored.
        if !self.monitored.contains_key(&id) {
            return;
        }
        self.update_monitored(id, rssi, now);
        if let Some(target) = self.monitored.get_mut(&id) {
            target.last_read_at = Some(now);
        }
        if self.mode != ScanMode::ActivePoll && !self.config.passive_mode {
            self.enter_active_poll(now);
        }
    }

    fn on_characteristic_value(&mut self, id: Uuid, characteristic: Uuid, value: &[u8]) {
        let Ok(text) = std::str::from_utf8(value) else {
            return;
        };
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let Some(device) = self.discovered.get_mut(&id) else {
            return;
        };

        if characteristic == MANUFACTURER_NAME {
            device.manufacturer = Some(text.to_string());
        } else if characteristic == MODEL_NUMBER {
            device.model = Some(text.to_string());
        } else {
            return;
        }

        let snapshot = device.snapshot();
        if device.identity_resolved()
            && !self.monitored.contains_key(&id)
            && device.link != LinkState::Disconnected
        {
            // The side connection served its purpose.
            device.link = LinkState::Disconnected;
            self.commands.push(RadioCommand::CancelConnect { id });
        }
        self.notifications
            .push(Notification::DeviceUpdated(snapshot));
    }

    // ========================================================================
    // Timer handlers
    // ========================================================================

    fn handle_timer(&mut self, kind: TimerKind, now: Instant) {
        match kind {
            TimerKind::SignalLoss(id) => self.on_signal_loss(id, now),
            TimerKind::ConnectTimeout(id) => self.on_connect_timeout(id),
            TimerKind::DiscoveryExpiry(id) => self.on_discovery_expiry(id),
            TimerKind::ProximityExit => self.on_proximity_exit(),
            TimerKind::PollTick => self.on_poll_tick(now),
        }
    }

    fn on_signal_loss(&mut self, id: Uuid, now: Instant) {
        if !self.monitored.contains_key(&id) {
            return;
        }
        debug!(%id, "no samples within signal timeout; RSSI now unknown");
        if let Some(target) = self.monitored.get_mut(&id) {
            target.signal_timer = None;
        }
        self.estimator.clear(id);
        self.notifications.push(Notification::RssiUpdate {
            id,
            rssi: None,
            active: false,
        });
        self.update_presence(now);
    }

    fn on_connect_timeout(&mut self, id: Uuid) {
        if let Some(target) = self.monitored.get_mut(&id) {
            target.connect_timer = None;
            if target.link == LinkState::Connecting {
                debug!(%id, "connection attempt timed out");
                target.link = LinkState::Disconnected;
                self.commands.push(RadioCommand::CancelConnect { id });
            }
        }
    }

    fn on_discovery_expiry(&mut self, id: Uuid) {
        if let Some(device) = self.discovered.remove(&id) {
            debug!(%id, "discovered device expired");
            if device.link != LinkState::Disconnected {
                self.commands.push(RadioCommand::CancelConnect { id });
            }
            self.notifications
                .push(Notification::DeviceRemoved(device.snapshot()));
        }
    }

    fn on_proximity_exit(&mut self) {
        self.exit_timer = None;
        if self.presence {
            info!("all monitored targets away");
            self.presence = false;
            self.notifications.push(Notification::Presence {
                present: false,
                reason: PresenceReason::Away,
            });
        }
    }

    fn on_poll_tick(&mut self, now: Instant) {
        self.poll_timer = None;
        if self.mode != ScanMode::ActivePoll {
            return;
        }

        let ids: Vec<Uuid> = self.monitored.keys().copied().collect();
        let mut stale = false;
        for id in ids {
            let Some((link, last_read)) = self
                .monitored
                .get(&id)
                .map(|target| (target.link, target.last_read_at))
            else {
                continue;
            };
            let last_seen = last_read.or(self.active_since).unwrap_or(now);
            if now.duration_since(last_seen) > ACTIVE_READ_STALENESS {
                if link != LinkState::Disconnected {
                    self.commands.push(RadioCommand::CancelConnect { id });
                    if let Some(target) = self.monitored.get_mut(&id) {
                        target.link = LinkState::Disconnected;
                        if let Some(token) = target.connect_timer.take() {
                            self.sched.cancel(token);
                        }
                    }
                }
                stale = true;
            } else if link == LinkState::Connected {
                self.commands.push(RadioCommand::ReadRssi { id });
            } else {
                self.connect_target(id, now);
            }
        }

        if stale {
            info!("stale active reads; falling back to passive scanning");
            self.mode = ScanMode::PassiveScan;
            self.active_since = None;
            self.ensure_scanning();
        } else {
            self.poll_timer = Some(
                self.sched
                    .schedule(now + ACTIVE_POLL_INTERVAL, TimerKind::PollTick),
            );
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_scanning(&mut self) {
        if self.powered && !self.scanning && self.mode != ScanMode::Idle {
            self.commands.push(RadioCommand::StartScan);
            self.scanning = true;
        }
    }

    /// Records a sample, reports the new estimate, recomputes presence, and
    /// re-arms the signal-loss timer.
    fn update_monitored(&mut self, id: Uuid, rssi: i16, now: Instant) {
        self.estimator.record_sample(id, rssi);
        let estimate = self.estimator.estimate(id);
        let active = self.mode == ScanMode::ActivePoll;
        self.notifications.push(Notification::RssiUpdate {
            id,
            rssi: Some(estimate),
            active,
        });
        self.update_presence(now);
        self.reset_signal_timer(id, now);
    }

    /// Recomputes the aggregate presence flag.
    ///
    /// Any estimate at/above the effective threshold makes the aggregate
    /// present immediately and cancels a pending exit debounce. The absent
    /// transition is committed only by the debounce timer.
    fn update_presence(&mut self, now: Instant) {
        let threshold = self.config.effective_threshold();
        let any_present = self
            .monitored
            .keys()
            .any(|id| self.estimator.estimate(*id) >= threshold);

        if any_present {
            if !self.presence {
                info!("at least one monitored target is close");
                self.presence = true;
                self.notifications.push(Notification::Presence {
                    present: true,
                    reason: PresenceReason::Close,
                });
            }
            if let Some(token) = self.exit_timer.take() {
                debug!("proximity exit debounce cancelled");
                self.sched.cancel(token);
            }
        } else if self.presence && self.exit_timer.is_none() {
            debug!("proximity exit debounce started");
            self.exit_timer = Some(
                self.sched
                    .schedule(now + self.config.proximity_timeout(), TimerKind::ProximityExit),
            );
        }
    }

    fn reset_signal_timer(&mut self, id: Uuid, now: Instant) {
        let deadline = now + self.config.signal_timeout();
        if let Some(target) = self.monitored.get_mut(&id) {
            if let Some(token) = target.signal_timer.take() {
                self.sched.cancel(token);
            }
            target.signal_timer = Some(self.sched.schedule(deadline, TimerKind::SignalLoss(id)));
        }
    }

    fn reset_discovery_timer(&mut self, id: Uuid, now: Instant) {
        let deadline = now + self.config.signal_timeout();
        if let Some(device) = self.discovered.get_mut(&id) {
            if let Some(token) = device.expiry_timer.take() {
                self.sched.cancel(token);
            }
            device.expiry_timer = Some(
                self.sched
                    .schedule(deadline, TimerKind::DiscoveryExpiry(id)),
            );
        }
    }

    /// Requests an opportunistic RSSI read and, if no attempt is in flight,
    /// a connection with a stuck-attempt timeout.
    fn connect_target(&mut self, id: Uuid, now: Instant) {
        let Some((sighted, link)) = self
            .monitored
            .get(&id)
            .map(|target| (target.sighted, target.link))
        else {
            return;
        };
        // Connections only make sense for peripherals the radio has sighted.
        if !sighted {
            return;
        }

        // Some stacks deliver a read result even when the connect completion
        // never arrives, so always ask.
        self.commands.push(RadioCommand::ReadRssi { id });

        if link == LinkState::Disconnected {
            debug!(%id, "connecting to target");
            self.commands.push(RadioCommand::Connect { id });
            let token = self
                .sched
                .schedule(now + CONNECT_ATTEMPT_TIMEOUT, TimerKind::ConnectTimeout(id));
            if let Some(target) = self.monitored.get_mut(&id) {
                target.link = LinkState::Connecting;
                if let Some(old) = target.connect_timer.take() {
                    self.sched.cancel(old);
                }
                target.connect_timer = Some(token);
            }
        }
    }

    fn enter_active_poll(&mut self, now: Instant) {
        info!("entering active poll mode");
        self.mode = ScanMode::ActivePoll;
        self.active_since = Some(now);
        if !self.discovery && self.scanning {
            self.commands.push(RadioCommand::StopScan);
            self.scanning = false;
        }
        if let Some(token) = self.poll_timer.take() {
            self.sched.cancel(token);
        }
        self.poll_timer = Some(
            self.sched
                .schedule(now + ACTIVE_POLL_INTERVAL, TimerKind::PollTick),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(config: MonitorConfig, ids: &[Uuid]) -> (Engine, Instant) {
        let mut engine = Engine::new(config);
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.start_monitoring(ids.to_vec(), now);
        engine.take_commands();
        engine.take_notifications();
        (engine, now)
    }

    fn adv(id: Uuid, rssi: i16) -> RadioEvent {
        RadioEvent::Discovered {
            id,
            rssi,
            local_name: None,
            manufacturer_data: None,
            services: Vec::new(),
        }
    }

    fn presence_events(notifications: &[Notification]) -> Vec<(bool, PresenceReason)> {
        notifications
            .iter()
            .filter_map(|n| match n {
                Notification::Presence { present, reason } => Some((*present, *reason)),
                _ => None,
            })
            .collect()
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    // ------------------------------------------------------------------
    // Presence state machine
    // ------------------------------------------------------------------

    #[test]
    fn test_presence_fires_immediately_when_target_close() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);

        engine.handle_event(adv(a, -55), now);
        let events = presence_events(&engine.take_notifications());
        assert_eq!(events, vec![(true, PresenceReason::Close)]);

        // A second close reading must not re-announce.
        engine.handle_event(adv(a, -50), now);
        assert!(presence_events(&engine.take_notifications()).is_empty());
    }

    #[test]
    fn test_away_fires_once_after_debounce() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a, b]);

        engine.handle_event(adv(a, -55), now);
        assert_eq!(
            presence_events(&engine.take_notifications()),
            vec![(true, PresenceReason::Close)]
        );

        // Five consecutive weak readings from both targets fill the windows.
        for _ in 0..5 {
            engine.handle_event(adv(a, -90), now);
            engine.handle_event(adv(b, -90), now);
        }
        assert!(presence_events(&engine.take_notifications()).is_empty());
        assert!(engine.presence());

        engine.fire_due(now + secs(5));
        assert_eq!(
            presence_events(&engine.take_notifications()),
            vec![(false, PresenceReason::Away)]
        );
        assert!(!engine.presence());

        // Nothing further fires.
        engine.fire_due(now + secs(60));
        assert!(presence_events(&engine.take_notifications()).is_empty());
    }

    #[test]
    fn test_qualifying_reading_cancels_pending_exit() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);

        engine.handle_event(adv(a, -55), now);
        for _ in 0..5 {
            engine.handle_event(adv(a, -90), now);
        }
        engine.take_notifications();

        // One strong reading during the debounce window keeps presence.
        engine.handle_event(adv(a, 0), now + secs(1));
        engine.fire_due(now + secs(10));

        assert!(engine.presence());
        assert!(presence_events(&engine.take_notifications()).is_empty());
    }

    #[test]
    fn test_unsampled_target_never_counts_as_present() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        assert!(!engine.presence());
        // Arming timers alone must not produce presence.
        engine.fire_due(now + secs(1));
        assert!(!engine.presence());
        assert!(presence_events(&engine.take_notifications()).is_empty());
    }

    #[test]
    fn test_positive_reading_clamps_to_zero_and_counts_present() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, 42), now);
        assert!(engine.presence());
        let notifications = engine.take_notifications();
        assert!(notifications.contains(&Notification::RssiUpdate {
            id: a,
            rssi: Some(0),
            active: false,
        }));
    }

    #[test]
    fn test_unlock_threshold_gates_when_lock_disabled() {
        let a = Uuid::new_v4();
        let config = MonitorConfig {
            lock_rssi: None,
            ..MonitorConfig::default()
        };
        let (mut engine, now) = started(config, &[a]);

        // -70 would satisfy the default lock threshold but not unlock.
        engine.handle_event(adv(a, -70), now);
        assert!(!engine.presence());

        engine.handle_event(adv(a, -50), now);
        // Window mean is (-70 + -50) / 2 = -60, exactly the unlock threshold.
        assert!(engine.presence());
    }

    #[test]
    fn test_set_thresholds_recomputes_presence() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -70), now);
        assert!(engine.presence());
        engine.take_notifications();

        // Tightening the band below the estimate starts the exit debounce.
        engine.set_thresholds(Some(-60), -50, now);
        assert!(engine.presence());
        engine.fire_due(now + secs(5));
        assert_eq!(
            presence_events(&engine.take_notifications()),
            vec![(false, PresenceReason::Away)]
        );
    }

    // ------------------------------------------------------------------
    // Signal-loss lifecycle
    // ------------------------------------------------------------------

    #[test]
    fn test_signal_loss_clears_window_and_releases_presence() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -55), now);
        engine.take_notifications();

        // No samples for the 60s signal timeout.
        engine.fire_due(now + secs(60));
        let notifications = engine.take_notifications();
        assert!(notifications.contains(&Notification::RssiUpdate {
            id: a,
            rssi: None,
            active: false,
        }));
        // Presence is still true until the exit debounce elapses.
        assert!(engine.presence());

        engine.fire_due(now + secs(65));
        assert_eq!(
            presence_events(&engine.take_notifications()),
            vec![(false, PresenceReason::Away)]
        );
    }

    #[test]
    fn test_sample_resets_signal_loss_timer() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -55), now);
        engine.handle_event(adv(a, -55), now + secs(30));
        engine.take_notifications();

        // The original deadline passes without effect.
        engine.fire_due(now + secs(62));
        let notifications = engine.take_notifications();
        assert!(!notifications.contains(&Notification::RssiUpdate {
            id: a,
            rssi: None,
            active: false,
        }));
    }

    // ------------------------------------------------------------------
    // Scanning-mode controller
    // ------------------------------------------------------------------

    #[test]
    fn test_monitoring_starts_passive_scan() {
        let mut engine = Engine::new(MonitorConfig::default());
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        assert_eq!(engine.mode(), ScanMode::Idle);

        engine.start_monitoring(vec![Uuid::new_v4()], now);
        assert_eq!(engine.mode(), ScanMode::PassiveScan);
        assert!(engine.take_commands().contains(&RadioCommand::StartScan));
    }

    #[test]
    fn test_sighting_requests_connection() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -55), now);
        let commands = engine.take_commands();
        assert!(commands.contains(&RadioCommand::ReadRssi { id: a }));
        assert!(commands.contains(&RadioCommand::Connect { id: a }));
    }

    #[test]
    fn test_first_successful_read_enters_active_poll() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -55), now);
        engine.take_commands();

        engine.handle_event(RadioEvent::Connected { id: a }, now);
        assert!(engine
            .take_commands()
            .contains(&RadioCommand::ReadRssi { id: a }));

        engine.handle_event(RadioEvent::RssiRead { id: a, rssi: -50 }, now);
        assert_eq!(engine.mode(), ScanMode::ActivePoll);
        // Broadcast scanning is no longer needed outside discovery.
        assert!(engine.take_commands().contains(&RadioCommand::StopScan));
    }

    #[test]
    fn test_poll_tick_reads_connected_targets() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -55), now);
        engine.handle_event(RadioEvent::Connected { id: a }, now);
        engine.handle_event(RadioEvent::RssiRead { id: a, rssi: -50 }, now);
        engine.take_commands();

        engine.fire_due(now + secs(2));
        assert!(engine
            .take_commands()
            .contains(&RadioCommand::ReadRssi { id: a }));
        assert_eq!(engine.mode(), ScanMode::ActivePoll);
    }

    #[test]
    fn test_stale_reads_fall_back_to_passive_scan() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -55), now);
        engine.handle_event(RadioEvent::Connected { id: a }, now);
        engine.handle_event(RadioEvent::RssiRead { id: a, rssi: -50 }, now);
        engine.take_commands();

        // Poll ticks at 2s intervals with no further reads; past the 10s
        // staleness window the controller tears the connection down.
        let mut at = now;
        for _ in 0..6 {
            at += secs(2);
            engine.fire_due(at);
        }

        assert_eq!(engine.mode(), ScanMode::PassiveScan);
        let commands = engine.take_commands();
        assert!(commands.contains(&RadioCommand::CancelConnect { id: a }));
        assert!(commands.contains(&RadioCommand::StartScan));
    }

    #[test]
    fn test_connect_timeout_cancels_stuck_attempt() {
        let a = Uuid::new_v4();
        let config = MonitorConfig {
            signal_timeout_secs: 300.0,
            ..MonitorConfig::default()
        };
        let (mut engine, now) = started(config, &[a]);
        engine.handle_event(adv(a, -55), now);
        engine.take_commands();

        // The attempt never completes within the 60s connect timeout.
        engine.fire_due(now + secs(60));
        assert!(engine
            .take_commands()
            .contains(&RadioCommand::CancelConnect { id: a }));

        // A later completion for the cancelled attempt is tolerated.
        engine.handle_event(RadioEvent::Disconnected { id: a }, now + secs(61));
    }

    #[test]
    fn test_passive_mode_never_connects() {
        let a = Uuid::new_v4();
        let config = MonitorConfig {
            passive_mode: true,
            ..MonitorConfig::default()
        };
        let (mut engine, now) = started(config, &[a]);
        engine.handle_event(adv(a, -55), now);

        let commands = engine.take_commands();
        assert!(!commands.contains(&RadioCommand::Connect { id: a }));
        // Broadcast sightings still drive presence.
        assert!(engine.presence());
    }

    #[test]
    fn test_enabling_passive_mode_cancels_connections() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -55), now);
        engine.handle_event(RadioEvent::Connected { id: a }, now);
        engine.handle_event(RadioEvent::RssiRead { id: a, rssi: -50 }, now);
        engine.take_commands();

        engine.set_passive_mode(true);
        assert_eq!(engine.mode(), ScanMode::PassiveScan);
        let commands = engine.take_commands();
        assert!(commands.contains(&RadioCommand::CancelConnect { id: a }));
        assert!(commands.contains(&RadioCommand::StartScan));

        // A read arriving afterwards must not re-enter active poll.
        engine.handle_event(RadioEvent::RssiRead { id: a, rssi: -50 }, now);
        assert_eq!(engine.mode(), ScanMode::PassiveScan);
    }

    #[test]
    fn test_active_reads_flagged_active() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -55), now);
        engine.handle_event(RadioEvent::Connected { id: a }, now);
        engine.handle_event(RadioEvent::RssiRead { id: a, rssi: -50 }, now);
        engine.take_notifications();

        engine.handle_event(RadioEvent::RssiRead { id: a, rssi: -48 }, now + secs(2));
        let notifications = engine.take_notifications();
        assert!(notifications.iter().any(|n| matches!(
            n,
            Notification::RssiUpdate { id, active: true, .. } if *id == a
        )));
    }

    #[test]
    fn test_replacing_monitored_set_releases_resources() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -55), now);
        engine.handle_event(RadioEvent::Connected { id: a }, now);
        engine.take_commands();
        engine.take_notifications();

        engine.start_monitoring(vec![b], now);
        assert!(engine
            .take_commands()
            .contains(&RadioCommand::CancelConnect { id: a }));
        assert!(!engine.presence());

        // The old target's signal timer is gone: no unknown-RSSI event.
        engine.fire_due(now + secs(120));
        let notifications = engine.take_notifications();
        assert!(!notifications
            .iter()
            .any(|n| matches!(n, Notification::RssiUpdate { id, .. } if *id == a)));
    }

    // ------------------------------------------------------------------
    // Power state
    // ------------------------------------------------------------------

    #[test]
    fn test_power_off_warns_once_and_forces_absent() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -55), now);
        engine.take_notifications();

        engine.handle_event(RadioEvent::PoweredOff, now);
        let notifications = engine.take_notifications();
        assert_eq!(notifications, vec![Notification::PowerWarning]);
        assert!(!engine.presence());
        assert_eq!(engine.mode(), ScanMode::Idle);

        // Duplicate power-off events warn only once per power cycle.
        engine.handle_event(RadioEvent::PoweredOff, now);
        assert!(engine.take_notifications().is_empty());

        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.take_notifications();
        engine.handle_event(RadioEvent::PoweredOff, now);
        assert_eq!(engine.take_notifications(), vec![Notification::PowerWarning]);
    }

    #[test]
    fn test_power_off_cancels_pending_exit_debounce() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(adv(a, -55), now);
        for _ in 0..5 {
            engine.handle_event(adv(a, -90), now);
        }
        engine.take_notifications();

        engine.handle_event(RadioEvent::PoweredOff, now + secs(1));
        engine.take_notifications();
        engine.fire_due(now + secs(30));
        // No stray away event after suspension.
        assert!(presence_events(&engine.take_notifications()).is_empty());
    }

    #[test]
    fn test_power_on_resumes_passive_scan_for_monitored_set() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        engine.handle_event(RadioEvent::PoweredOff, now);
        engine.take_commands();

        engine.handle_event(RadioEvent::PoweredOn, now + secs(1));
        assert_eq!(engine.mode(), ScanMode::PassiveScan);
        assert!(engine.take_commands().contains(&RadioCommand::StartScan));
    }

    // ------------------------------------------------------------------
    // Discovery coordinator
    // ------------------------------------------------------------------

    fn new_device_count(notifications: &[Notification]) -> usize {
        notifications
            .iter()
            .filter(|n| matches!(n, Notification::NewDevice(_)))
            .count()
    }

    #[test]
    fn test_discovery_creates_then_updates() {
        let x = Uuid::new_v4();
        let mut engine = Engine::new(MonitorConfig::default());
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.start_discovery();
        engine.take_commands();

        engine.handle_event(adv(x, -65), now);
        let notifications = engine.take_notifications();
        assert_eq!(new_device_count(&notifications), 1);
        assert!(engine.take_commands().contains(&RadioCommand::Connect { id: x }));

        engine.handle_event(adv(x, -60), now + secs(1));
        let notifications = engine.take_notifications();
        assert_eq!(new_device_count(&notifications), 0);
        assert!(notifications
            .iter()
            .any(|n| matches!(n, Notification::DeviceUpdated(snap) if snap.rssi == -60)));
        // No second side connection for an already-registered device.
        assert!(!engine.take_commands().contains(&RadioCommand::Connect { id: x }));
    }

    #[test]
    fn test_advertised_name_labels_unresolved_device() {
        let x = Uuid::new_v4();
        let mut engine = Engine::new(MonitorConfig::default());
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.start_discovery();

        engine.handle_event(
            RadioEvent::Discovered {
                id: x,
                rssi: -55,
                local_name: Some("Pixel Buds".to_string()),
                manufacturer_data: None,
                services: Vec::new(),
            },
            now,
        );
        let notifications = engine.take_notifications();
        assert!(notifications
            .iter()
            .any(|n| matches!(n, Notification::NewDevice(snap) if snap.label == "Pixel Buds")));

        // A later nameless sighting keeps the known name.
        engine.handle_event(adv(x, -50), now + secs(1));
        let notifications = engine.take_notifications();
        assert!(notifications
            .iter()
            .any(|n| matches!(n, Notification::DeviceUpdated(snap) if snap.label == "Pixel Buds")));
    }

    #[test]
    fn test_discovery_ignores_weak_sightings() {
        let x = Uuid::new_v4();
        let mut engine = Engine::new(MonitorConfig::default());
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.start_discovery();

        engine.handle_event(adv(x, -75), now);
        assert_eq!(new_device_count(&engine.take_notifications()), 0);
        assert!(engine.device_snapshots().is_empty());
    }

    #[test]
    fn test_discovery_ignores_exposure_notification_advertisers() {
        let x = Uuid::new_v4();
        let mut engine = Engine::new(MonitorConfig::default());
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.start_discovery();

        engine.handle_event(
            RadioEvent::Discovered {
                id: x,
                rssi: -40,
                local_name: None,
                manufacturer_data: None,
                services: vec![EXPOSURE_NOTIFICATION],
            },
            now,
        );
        assert_eq!(new_device_count(&engine.take_notifications()), 0);
    }

    #[test]
    fn test_discovery_ignores_excluded_identifiers() {
        let x = Uuid::new_v4();
        let config = MonitorConfig {
            excluded: vec![x],
            ..MonitorConfig::default()
        };
        let mut engine = Engine::new(config);
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.start_discovery();

        engine.handle_event(adv(x, -40), now);
        assert_eq!(new_device_count(&engine.take_notifications()), 0);
    }

    #[test]
    fn test_discovered_device_expires_after_silence() {
        let x = Uuid::new_v4();
        let mut engine = Engine::new(MonitorConfig::default());
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.start_discovery();
        engine.handle_event(adv(x, -65), now);
        engine.take_notifications();
        engine.take_commands();

        engine.fire_due(now + secs(60));
        let notifications = engine.take_notifications();
        assert!(notifications
            .iter()
            .any(|n| matches!(n, Notification::DeviceRemoved(snap) if snap.id == x)));
        // The pending side connection is released with the record.
        assert!(engine
            .take_commands()
            .contains(&RadioCommand::CancelConnect { id: x }));
        assert!(engine.device_snapshots().is_empty());
    }

    #[test]
    fn test_resighting_resets_removal_timer() {
        let x = Uuid::new_v4();
        let mut engine = Engine::new(MonitorConfig::default());
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.start_discovery();
        engine.handle_event(adv(x, -65), now);
        engine.handle_event(adv(x, -64), now + secs(30));
        engine.take_notifications();

        engine.fire_due(now + secs(62));
        assert!(engine
            .take_notifications()
            .iter()
            .all(|n| !matches!(n, Notification::DeviceRemoved(_))));
        assert_eq!(engine.device_snapshots().len(), 1);
    }

    #[test]
    fn test_identity_resolution_tears_down_side_connection() {
        let x = Uuid::new_v4();
        let mut engine = Engine::new(MonitorConfig::default());
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.start_discovery();
        engine.handle_event(adv(x, -65), now);
        engine.take_commands();
        engine.take_notifications();

        engine.handle_event(RadioEvent::Connected { id: x }, now);
        assert!(engine
            .take_commands()
            .contains(&RadioCommand::DiscoverServices { id: x }));

        engine.handle_event(
            RadioEvent::ServicesDiscovered {
                id: x,
                services: vec![DEVICE_INFORMATION],
            },
            now,
        );
        assert!(engine.take_commands().contains(&RadioCommand::DiscoverCharacteristics {
            id: x,
            service: DEVICE_INFORMATION,
        }));

        engine.handle_event(
            RadioEvent::CharacteristicsDiscovered {
                id: x,
                service: DEVICE_INFORMATION,
                characteristics: vec![MANUFACTURER_NAME, MODEL_NUMBER],
            },
            now,
        );
        let commands = engine.take_commands();
        assert!(commands.contains(&RadioCommand::ReadCharacteristic {
            id: x,
            characteristic: MANUFACTURER_NAME,
        }));
        assert!(commands.contains(&RadioCommand::ReadCharacteristic {
            id: x,
            characteristic: MODEL_NUMBER,
        }));

        engine.handle_event(
            RadioEvent::CharacteristicValue {
                id: x,
                characteristic: MANUFACTURER_NAME,
                value: b"Apple Inc.".to_vec(),
            },
            now,
        );
        assert!(engine.take_commands().is_empty());

        engine.handle_event(
            RadioEvent::CharacteristicValue {
                id: x,
                characteristic: MODEL_NUMBER,
                value: b"iPhone10,3".to_vec(),
            },
            now,
        );
        // Both resolved for a non-monitored device: connection released.
        assert!(engine
            .take_commands()
            .contains(&RadioCommand::CancelConnect { id: x }));

        let snapshots = engine.device_snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].label, "iPhone X");
    }

    #[test]
    fn test_exclude_removes_registered_device() {
        let x = Uuid::new_v4();
        let mut engine = Engine::new(MonitorConfig::default());
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.start_discovery();
        engine.handle_event(adv(x, -65), now);
        engine.take_notifications();
        engine.take_commands();

        engine.exclude_device(x);
        assert!(engine
            .take_notifications()
            .iter()
            .any(|n| matches!(n, Notification::DeviceRemoved(snap) if snap.id == x)));
        assert!(engine
            .take_commands()
            .contains(&RadioCommand::CancelConnect { id: x }));
        assert!(engine.config().excluded.contains(&x));

        // Further sightings stay ignored.
        engine.handle_event(adv(x, -40), now + secs(1));
        assert_eq!(new_device_count(&engine.take_notifications()), 0);
    }

    #[test]
    fn test_stop_discovery_drops_registry_silently() {
        let x = Uuid::new_v4();
        let mut engine = Engine::new(MonitorConfig::default());
        let now = Instant::now();
        engine.handle_event(RadioEvent::PoweredOn, now);
        engine.start_discovery();
        engine.handle_event(adv(x, -65), now);
        engine.take_notifications();
        engine.take_commands();

        engine.stop_discovery();
        assert!(engine.device_snapshots().is_empty());
        let commands = engine.take_commands();
        assert!(commands.contains(&RadioCommand::CancelConnect { id: x }));
        assert!(commands.contains(&RadioCommand::StopScan));
        assert_eq!(engine.mode(), ScanMode::Idle);

        // The cancelled expiry timer stays silent.
        engine.fire_due(now + secs(120));
        assert!(engine.take_notifications().is_empty());
    }

    // ------------------------------------------------------------------
    // Status snapshots
    // ------------------------------------------------------------------

    #[test]
    fn test_target_status_reports_unknown_signal() {
        let a = Uuid::new_v4();
        let (mut engine, now) = started(MonitorConfig::default(), &[a]);
        let statuses = engine.target_statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].rssi, None);

        engine.handle_event(adv(a, -55), now);
        let statuses = engine.target_statuses();
        assert_eq!(statuses[0].rssi, Some(-55));
    }
}
