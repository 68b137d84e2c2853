//! Core engine for nearlock: Bluetooth LE proximity and presence
//! detection for monitored devices.
//!
//! The crate is split into a deterministic core and an async shell:
//!
//! - [`engine`] is the synchronous state machine. It consumes
//!   [`events::RadioEvent`]s and timer firings, and queues
//!   [`events::RadioCommand`]s and [`events::Notification`]s. It never
//!   performs I/O, which is what makes the presence logic testable with
//!   plain `Instant` arithmetic.
//! - [`runtime`] hosts the engine in a tokio task behind a cloneable
//!   [`runtime::EngineHandle`], multiplexing radio events, control
//!   requests, and timer deadlines.
//! - [`bluetooth`] (behind the `bluetooth` feature, on by default) is the
//!   btleplug-backed transport for real adapters. Any
//!   [`runtime::RadioTransport`] implementation can stand in for it.
//!
//! Supporting modules: [`rssi`] (signal smoothing), [`sched`] (the timer
//! wheel), [`device`] (target and discovery records plus display labels),
//! [`config`] (TOML configuration), and [`error`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod rssi;
pub mod runtime;
pub mod sched;

#[cfg(feature = "bluetooth")]
pub use bluetooth::BtleplugTransport;
pub use config::{ConfigError, MonitorConfig};
pub use device::{DeviceSnapshot, LinkState};
pub use engine::{Engine, ScanMode, TargetStatus};
pub use error::{NearlockError, Result};
pub use events::{Notification, PresenceReason, RadioCommand, RadioEvent};
pub use runtime::{EngineHandle, EngineRuntime, EngineSnapshot, RadioTransport};
