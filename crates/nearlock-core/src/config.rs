//! Engine configuration management.
//!
//! Handles loading, saving, and validating the nearlock configuration:
//! - Presence thresholds (lock/unlock hysteresis band)
//! - Discovery threshold and timeouts
//! - RSSI smoothing window size
//! - Passive-only scanning
//! - Monitored set and persisted exclusion list

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors produced while loading, saving, or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("failed to write {path}: {source}")]
    WriteError {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file exists but is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A field value is out of range or inconsistent.
    #[error("invalid value for `{field}`: {message}")]
    ValidationError {
        /// Field that failed validation.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Engine configuration.
///
/// Thresholds are in dBm. The lock threshold may be disabled (TOML value
/// `"disabled"`), in which case the unlock threshold gates presence in both
/// directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// RSSI below which monitored targets count as away. `None` disables
    /// the lower bound of the hysteresis band.
    #[serde(with = "lock_rssi_serde")]
    pub lock_rssi: Option<i16>,

    /// RSSI at or above which a monitored target counts as close.
    pub unlock_rssi: i16,

    /// Minimum sighting RSSI for a peripheral to enter the discovery
    /// registry.
    pub discovery_rssi: i16,

    /// How long all targets must stay below threshold before the aggregate
    /// presence drops to absent.
    pub proximity_timeout_secs: f64,

    /// How long a monitored target may stay silent before its signal is
    /// declared unknown (also the discovery removal timeout).
    pub signal_timeout_secs: f64,

    /// Number of samples in each smoothing window.
    pub rssi_window: usize,

    /// Never hold active connections to monitored targets; rely on
    /// broadcast sightings only.
    pub passive_mode: bool,

    /// Identifiers of the monitored peripherals, resumed at startup.
    pub monitored: Vec<Uuid>,

    /// Identifiers permanently hidden from discovery.
    pub excluded: Vec<Uuid>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            lock_rssi: Some(-80),
            unlock_rssi: -60,
            discovery_rssi: -70,
            proximity_timeout_secs: 5.0,
            signal_timeout_secs: 60.0,
            rssi_window: crate::rssi::DEFAULT_WINDOW_SIZE,
            passive_mode: false,
            monitored: Vec::new(),
            excluded: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// The single threshold gating the aggregate presence flag: the lock
    /// threshold, or the unlock threshold when locking is disabled.
    #[must_use]
    pub fn effective_threshold(&self) -> i16 {
        self.lock_rssi.unwrap_or(self.unlock_rssi)
    }

    /// Sentinel estimate for targets without samples: guaranteed below the
    /// effective threshold so they never count as present.
    #[must_use]
    pub fn absent_rssi(&self) -> i16 {
        self.effective_threshold() - 1
    }

    /// Proximity-exit debounce interval.
    #[must_use]
    pub fn proximity_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.proximity_timeout_secs)
    }

    /// Signal-loss and discovery-removal interval.
    #[must_use]
    pub fn signal_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.signal_timeout_secs)
    }

    /// Loads configuration from `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed, or
    /// validated.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: path.display().to_string(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Default configuration file location.
    ///
    /// On Linux: `/etc/nearlock/config.toml`. Elsewhere the platform config
    /// directory is used, falling back to the working directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/nearlock/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "nearlock")
                .map(|dirs| dirs.config_dir().join("config.toml"))
                .unwrap_or_else(|| PathBuf::from("nearlock.toml"))
        }
    }

    /// Checks every field for range and consistency.
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` encountered.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(lock) = self.lock_rssi {
            validate_rssi("lock_rssi", lock)?;
            if self.unlock_rssi < lock {
                return Err(ConfigError::ValidationError {
                    field: "unlock_rssi",
                    message: format!(
                        "unlock threshold ({}) must be at or above the lock threshold ({lock})",
                        self.unlock_rssi
                    ),
                });
            }
        }
        validate_rssi("unlock_rssi", self.unlock_rssi)?;
        validate_rssi("discovery_rssi", self.discovery_rssi)?;

        if !self.proximity_timeout_secs.is_finite() || self.proximity_timeout_secs <= 0.0 {
            return Err(ConfigError::ValidationError {
                field: "proximity_timeout_secs",
                message: "must be a positive number of seconds".to_string(),
            });
        }
        if !self.signal_timeout_secs.is_finite() || self.signal_timeout_secs <= 0.0 {
            return Err(ConfigError::ValidationError {
                field: "signal_timeout_secs",
                message: "must be a positive number of seconds".to_string(),
            });
        }
        if self.rssi_window == 0 {
            return Err(ConfigError::ValidationError {
                field: "rssi_window",
                message: "window must hold at least one sample".to_string(),
            });
        }
        Ok(())
    }
}

fn validate_rssi(field: &'static str, value: i16) -> ConfigResult<()> {
    if (-100..=0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            field,
            message: format!("{value} dBm is outside the plausible range -100..=0"),
        })
    }
}

mod lock_rssi_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Value(i16),
        Text(String),
    }

    pub fn serialize<S>(value: &Option<i16>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(rssi) => serializer.serialize_i16(*rssi),
            None => serializer.serialize_str("disabled"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i16>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Value(rssi) => Ok(Some(rssi)),
            Raw::Text(text) if text.eq_ignore_ascii_case("disabled") => Ok(None),
            Raw::Text(text) => Err(serde::de::Error::custom(format!(
                "expected an RSSI value or \"disabled\", got {text:?}"
            ))),
        }
    }
}
