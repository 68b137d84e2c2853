//! Unified error types for the nearlock core library.
//!
//! Nothing inside the engine's event loop is fatal: transient radio
//! failures degrade to passive scanning, identity-resolution misses degrade
//! to coarser labels, and a powered-off adapter suspends monitoring. The
//! variants here cover the edges where errors *do* surface: adapter
//! bring-up, configuration, persistence, and a stopped runtime.
//!
//! # Design Principles
//!
//! - **Specific variants**: each variant captures exactly one failure mode
//! - **Actionable messages**: error messages guide users toward resolution
//! - **HTTP-ready**: error types map to HTTP status codes and error codes

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// The unified error type for all nearlock operations.
#[derive(Debug, Error)]
pub enum NearlockError {
    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    AdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Enable Bluetooth and retry.")]
    AdapterPoweredOff,

    /// The radio event stream or scan session could not be established.
    #[error("Bluetooth scan failed: {0}")]
    ScanFailed(String),

    /// A peripheral the engine was asked about is not known to the radio.
    #[error("Unknown peripheral: {0}. It may be out of range or no longer advertising.")]
    UnknownPeripheral(Uuid),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // RUNTIME & I/O ERRORS
    // =========================================================================
    /// The engine control task is no longer running.
    #[error("Engine is not running")]
    EngineStopped,

    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for nearlock operations.
pub type Result<T> = std::result::Result<T, NearlockError>;

impl NearlockError {
    /// Returns `true` if this error is related to the Bluetooth radio.
    #[inline]
    #[must_use]
    pub fn is_radio_error(&self) -> bool {
        matches!(
            self,
            Self::AdapterNotFound
                | Self::AdapterPoweredOff
                | Self::ScanFailed(_)
                | Self::UnknownPeripheral(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is likely recoverable without user
    /// intervention.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ScanFailed(_) | Self::UnknownPeripheral(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::ConfigNotFound(_) | Self::UnknownPeripheral(_) => 404,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,
            Self::EngineStopped | Self::PersistenceError(_) | Self::IoError(_) => 500,
            Self::AdapterNotFound | Self::AdapterPoweredOff | Self::ScanFailed(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AdapterNotFound => "ADAPTER_NOT_FOUND",
            Self::AdapterPoweredOff => "ADAPTER_POWERED_OFF",
            Self::ScanFailed(_) => "SCAN_FAILED",
            Self::UnknownPeripheral(_) => "UNKNOWN_PERIPHERAL",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::EngineStopped => "ENGINE_STOPPED",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

impl From<crate::config::ConfigError> for NearlockError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {path}: {source}"))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_radio_error_classification() {
        assert!(NearlockError::AdapterNotFound.is_radio_error());
        assert!(NearlockError::AdapterPoweredOff.is_radio_error());
        assert!(NearlockError::ScanFailed("test".into()).is_radio_error());
        assert!(NearlockError::UnknownPeripheral(Uuid::new_v4()).is_radio_error());

        assert!(!NearlockError::EngineStopped.is_radio_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(NearlockError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(NearlockError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(NearlockError::ConfigValidationError("invalid value".into()).is_config_error());

        assert!(!NearlockError::AdapterNotFound.is_config_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(NearlockError::ScanFailed("timeout".into()).is_recoverable());
        assert!(NearlockError::UnknownPeripheral(Uuid::new_v4()).is_recoverable());
        assert!(!NearlockError::AdapterNotFound.is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            NearlockError::ConfigNotFound(PathBuf::new()).http_status_code(),
            404
        );
        assert_eq!(
            NearlockError::ConfigParseError("error".into()).http_status_code(),
            422
        );
        assert_eq!(NearlockError::EngineStopped.http_status_code(), 500);
        assert_eq!(NearlockError::AdapterNotFound.http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            NearlockError::AdapterNotFound.error_code(),
            "ADAPTER_NOT_FOUND"
        );
        assert_eq!(NearlockError::EngineStopped.error_code(), "ENGINE_STOPPED");
    }

    #[test]
    fn test_from_config_error() {
        let err: NearlockError = crate::config::ConfigError::ValidationError {
            field: "rssi_window",
            message: "window must hold at least one sample".to_string(),
        }
        .into();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("rssi_window"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoErr::new(ErrorKind::NotFound, "file not found");
        let err: NearlockError = io_err.into();
        assert!(matches!(err, NearlockError::IoError(_)));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<NearlockError>();
        assert_sync::<NearlockError>();
    }
}
