//! Async driver for the engine.
//!
//! The engine itself is synchronous and single-threaded; this module owns
//! it inside a tokio task and multiplexes three inputs: radio events from
//! the transport, control requests from [`EngineHandle`]s, and timer
//! deadlines. After every dispatch the queued radio commands are handed to
//! the transport and the queued notifications are fanned out on a
//! broadcast channel.

use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::device::DeviceSnapshot;
use crate::engine::{Engine, ScanMode, TargetStatus};
use crate::error::{NearlockError, Result};
use crate::events::{Notification, RadioCommand, RadioEvent};

/// Capacity of the control-request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 32;
/// Capacity of the notification broadcast channel. Slow subscribers lag
/// and drop old notifications rather than stalling the engine.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Boundary between the engine task and a concrete radio backend.
///
/// Implementations translate [`RadioCommand`]s into backend calls and
/// surface backend callbacks as [`RadioEvent`]s. The engine task calls
/// both methods from a single task, so implementations need no internal
/// synchronization.
#[async_trait]
pub trait RadioTransport: Send {
    /// Waits for the next radio event. Returning `None` means the backend
    /// is gone and the engine task should shut down.
    async fn next_event(&mut self) -> Option<RadioEvent>;

    /// Executes one command. Failures are reported back through
    /// [`RadioTransport::next_event`] (for example as a
    /// [`RadioEvent::ConnectFailed`]), never through a return value.
    async fn execute(&mut self, command: RadioCommand);
}

/// Point-in-time view of the whole engine, served to API consumers.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    /// Aggregate presence flag.
    pub present: bool,
    /// Current scanning mode.
    pub mode: ScanMode,
    /// Whether the adapter is powered on.
    pub powered: bool,
    /// Whether passive-only scanning is pinned.
    pub passive_mode: bool,
    /// Whether discovery mode is active.
    pub discovery: bool,
    /// Status of every monitored target.
    pub targets: Vec<TargetStatus>,
    /// Current discovery registry.
    pub devices: Vec<DeviceSnapshot>,
}

enum EngineRequest {
    Snapshot(oneshot::Sender<EngineSnapshot>),
    SetMonitored(Vec<Uuid>),
    SetPassiveMode(bool),
    StartDiscovery,
    StopDiscovery,
    Exclude(Uuid),
    SetThresholds {
        lock_rssi: Option<i16>,
        unlock_rssi: i16,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running engine task.
#[derive(Clone)]
pub struct EngineHandle {
    requests: mpsc::Sender<EngineRequest>,
    notifications: broadcast::Sender<Notification>,
}

impl EngineHandle {
    /// Subscribes to the notification stream. Subscribers that fall more
    /// than the channel capacity behind observe a lag error and resume
    /// from the current position.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Fetches a point-in-time snapshot of the engine.
    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineRequest::Snapshot(tx)).await?;
        rx.await.map_err(|_| NearlockError::EngineStopped)
    }

    /// Replaces the monitored set.
    pub async fn set_monitored(&self, ids: Vec<Uuid>) -> Result<()> {
        self.send(EngineRequest::SetMonitored(ids)).await
    }

    /// Enables or disables passive-only scanning.
    pub async fn set_passive_mode(&self, passive: bool) -> Result<()> {
        self.send(EngineRequest::SetPassiveMode(passive)).await
    }

    /// Enters discovery mode.
    pub async fn start_discovery(&self) -> Result<()> {
        self.send(EngineRequest::StartDiscovery).await
    }

    /// Leaves discovery mode and drops the transient registry.
    pub async fn stop_discovery(&self) -> Result<()> {
        self.send(EngineRequest::StopDiscovery).await
    }

    /// Permanently hides a peripheral from discovery.
    pub async fn exclude_device(&self, id: Uuid) -> Result<()> {
        self.send(EngineRequest::Exclude(id)).await
    }

    /// Applies new presence thresholds.
    pub async fn set_thresholds(&self, lock_rssi: Option<i16>, unlock_rssi: i16) -> Result<()> {
        self.send(EngineRequest::SetThresholds {
            lock_rssi,
            unlock_rssi,
        })
        .await
    }

    /// Asks the engine task to stop and release its radio resources.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(EngineRequest::Shutdown).await
    }

    async fn send(&self, request: EngineRequest) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| NearlockError::EngineStopped)
    }
}

/// Owns the engine task.
///
/// Dropping the runtime aborts the task; prefer [`EngineHandle::shutdown`]
/// for an orderly stop that releases connections first.
pub struct EngineRuntime {
    handle: EngineHandle,
    task: tokio::task::JoinHandle<()>,
}

impl EngineRuntime {
    /// Spawns the engine task over the given transport. Monitoring of the
    /// configured target set begins as soon as the adapter powers on.
    #[must_use]
    pub fn spawn<T: RadioTransport + 'static>(config: MonitorConfig, transport: T) -> Self {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (notification_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);

        let handle = EngineHandle {
            requests: request_tx,
            notifications: notification_tx.clone(),
        };

        let monitored = config.monitored.clone();
        let mut engine = Engine::new(config);
        engine.start_monitoring(monitored, Instant::now());

        let task = tokio::spawn(run_engine(engine, transport, request_rx, notification_tx));
        Self { handle, task }
    }

    /// A handle for issuing requests and subscribing to notifications.
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Waits for the engine task to finish.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|err| NearlockError::ScanFailed(format!("engine task panicked: {err}")))
    }
}

async fn run_engine<T: RadioTransport>(
    mut engine: Engine,
    mut transport: T,
    mut requests: mpsc::Receiver<EngineRequest>,
    notifications: broadcast::Sender<Notification>,
) {
    info!("engine task started");
    loop {
        flush(&mut engine, &mut transport, &notifications).await;

        let deadline = engine.next_deadline().map(tokio::time::Instant::from_std);
        tokio::select! {
            event = transport.next_event() => {
                let Some(event) = event else {
                    error!("radio transport closed; engine task stopping");
                    break;
                };
                engine.handle_event(event, Instant::now());
            }
            request = requests.recv() => {
                let Some(request) = request else {
                    debug!("all handles dropped; engine task stopping");
                    break;
                };
                if handle_request(&mut engine, request) {
                    break;
                }
            }
            () = sleep_until(deadline) => {
                engine.fire_due(Instant::now());
            }
        }
    }

    engine.stop();
    flush(&mut engine, &mut transport, &notifications).await;
    info!("engine task stopped");
}

/// Returns `true` when the task should shut down.
fn handle_request(engine: &mut Engine, request: EngineRequest) -> bool {
    let now = Instant::now();
    match request {
        EngineRequest::Snapshot(reply) => {
            let snapshot = EngineSnapshot {
                present: engine.presence(),
                mode: engine.mode(),
                powered: engine.is_powered(),
                passive_mode: engine.config().passive_mode,
                discovery: engine.discovery_active(),
                targets: engine.target_statuses(),
                devices: engine.device_snapshots(),
            };
            // A dropped receiver just means the caller gave up waiting.
            let _ = reply.send(snapshot);
        }
        EngineRequest::SetMonitored(ids) => engine.start_monitoring(ids, now),
        EngineRequest::SetPassiveMode(passive) => engine.set_passive_mode(passive),
        EngineRequest::StartDiscovery => engine.start_discovery(),
        EngineRequest::StopDiscovery => engine.stop_discovery(),
        EngineRequest::Exclude(id) => engine.exclude_device(id),
        EngineRequest::SetThresholds {
            lock_rssi,
            unlock_rssi,
        } => engine.set_thresholds(lock_rssi, unlock_rssi, now),
        EngineRequest::Shutdown => return true,
    }
    false
}

async fn flush<T: RadioTransport>(
    engine: &mut Engine,
    transport: &mut T,
    notifications: &broadcast::Sender<Notification>,
) {
    for command in engine.take_commands() {
        transport.execute(command).await;
    }
    for notification in engine.take_notifications() {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = notifications.send(notification);
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PresenceReason;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted transport: replays a fixed event sequence and records
    /// every executed command.
    struct ScriptedTransport {
        events: VecDeque<RadioEvent>,
        commands: Arc<Mutex<Vec<RadioCommand>>>,
    }

    #[async_trait]
    impl RadioTransport for ScriptedTransport {
        async fn next_event(&mut self) -> Option<RadioEvent> {
            match self.events.pop_front() {
                Some(event) => Some(event),
                None => {
                    // Keep the task alive after the script runs out.
                    std::future::pending().await
                }
            }
        }

        async fn execute(&mut self, command: RadioCommand) {
            self.commands
                .lock()
                .expect("command log poisoned")
                .push(command);
        }
    }

    fn scripted(events: Vec<RadioEvent>) -> (ScriptedTransport, Arc<Mutex<Vec<RadioCommand>>>) {
        let commands = Arc::new(Mutex::new(Vec::new()));
        (
            ScriptedTransport {
                events: events.into(),
                commands: Arc::clone(&commands),
            },
            commands,
        )
    }

    #[tokio::test]
    async fn test_runtime_reports_presence_transition() {
        let target = Uuid::new_v4();
        let config = MonitorConfig {
            monitored: vec![target],
            ..MonitorConfig::default()
        };
        let (transport, _commands) = scripted(vec![
            RadioEvent::PoweredOn,
            RadioEvent::Discovered {
                id: target,
                rssi: -50,
                local_name: None,
                manufacturer_data: None,
                services: Vec::new(),
            },
        ]);

        let runtime = EngineRuntime::spawn(config, transport);
        let handle = runtime.handle();
        let mut stream = handle.subscribe();

        loop {
            let notification = tokio::time::timeout(
                std::time::Duration::from_secs(1),
                stream.recv(),
            )
            .await
            .expect("timed out waiting for presence")
            .expect("notification stream closed");
            if let Notification::Presence { present, reason } = notification {
                assert!(present);
                assert_eq!(reason, PresenceReason::Close);
                break;
            }
        }

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert!(snapshot.present);
        assert!(snapshot.powered);
        assert_eq!(snapshot.targets.len(), 1);

        handle.shutdown().await.expect("shutdown");
        runtime.join().await.expect("join");
    }

    #[tokio::test]
    async fn test_runtime_forwards_commands_to_transport() {
        let target = Uuid::new_v4();
        let config = MonitorConfig {
            monitored: vec![target],
            ..MonitorConfig::default()
        };
        let (transport, commands) = scripted(vec![
            RadioEvent::PoweredOn,
            RadioEvent::Discovered {
                id: target,
                rssi: -50,
                local_name: None,
                manufacturer_data: None,
                services: Vec::new(),
            },
        ]);

        let runtime = EngineRuntime::spawn(config, transport);
        let handle = runtime.handle();
        let mut stream = handle.subscribe();

        // Wait until the sighting has been processed.
        loop {
            let notification = tokio::time::timeout(
                std::time::Duration::from_secs(1),
                stream.recv(),
            )
            .await
            .expect("timed out waiting for rssi update")
            .expect("notification stream closed");
            if matches!(notification, Notification::RssiUpdate { .. }) {
                break;
            }
        }
        handle.shutdown().await.expect("shutdown");
        runtime.join().await.expect("join");

        let log = commands.lock().expect("command log poisoned");
        assert!(log.contains(&RadioCommand::StartScan));
        assert!(log.contains(&RadioCommand::Connect { id: target }));
    }

    #[tokio::test]
    async fn test_handle_errors_after_shutdown() {
        let (transport, _commands) = scripted(vec![RadioEvent::PoweredOn]);
        let runtime = EngineRuntime::spawn(MonitorConfig::default(), transport);
        let handle = runtime.handle();

        handle.shutdown().await.expect("shutdown");
        runtime.join().await.expect("join");

        let err = handle.set_monitored(vec![Uuid::new_v4()]).await.unwrap_err();
        assert!(matches!(err, NearlockError::EngineStopped));
    }
}
