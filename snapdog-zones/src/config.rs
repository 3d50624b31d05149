//! Configuration types for snapdog-zones
//!
//! This module defines the declarative zone/client configuration together
//! with the timing knobs of the reconciler and the zone state machines.
//! Configuration is loaded from JSON and validated before use.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A configured logical zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Display name, also the expected backend group name
    pub name: String,
    /// Stream sink path the zone's audio is written to
    pub sink: String,
}

/// A configured physical client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    pub mac: String,
    /// 1-based zone the client joins on first start
    pub default_zone: usize,
}

/// Configuration for the topology reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Run the periodic convergence loop
    /// Default: true
    pub enabled: bool,

    /// Interval between periodic passes in milliseconds
    /// Default: 30000
    pub interval_ms: u64,

    /// Push configured client names to the backend
    /// Default: true
    pub sync_client_names: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            sync_client_names: true,
        }
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Configuration for zone playback behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Interval of the position refresh timer while playing
    /// Default: 1000
    pub position_refresh_ms: u64,

    /// Settle delay before resuming restored playback
    /// Default: 2000
    pub resume_delay_ms: u64,

    /// Capacity of the state-changed notification queue
    /// Default: 256
    pub notification_buffer: usize,

    /// Step used by volume up/down
    /// Default: 5
    pub volume_step: u8,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            position_refresh_ms: 1_000,
            resume_delay_ms: 2_000,
            notification_buffer: 256,
            volume_step: 5,
        }
    }
}

impl PlaybackConfig {
    pub fn position_refresh(&self) -> Duration {
        Duration::from_millis(self.position_refresh_ms)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapDogConfig {
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

impl SnapDogConfig {
    /// Create a configuration with default timing
    pub fn new(zones: Vec<ZoneConfig>, clients: Vec<ClientConfig>) -> Self {
        Self {
            zones,
            clients,
            reconciler: ReconcilerConfig::default(),
            playback: PlaybackConfig::default(),
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Validate the configuration and return the first issue found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zones.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one zone must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for (position, zone) in self.zones.iter().enumerate() {
            if zone.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Zone {} has an empty name",
                    position + 1
                )));
            }
            if zone.sink.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Zone '{}' has an empty sink path",
                    zone.name
                )));
            }
            if !names.insert(zone.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate zone name '{}'",
                    zone.name
                )));
            }
        }

        for (position, client) in self.clients.iter().enumerate() {
            if client.name.trim().is_empty() || client.mac.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Client {} needs both a name and a MAC address",
                    position + 1
                )));
            }
            if client.default_zone == 0 || client.default_zone > self.zones.len() {
                return Err(ConfigError::Invalid(format!(
                    "Client '{}' references zone {} but only {} zones exist",
                    client.name,
                    client.default_zone,
                    self.zones.len()
                )));
            }
        }

        if self.reconciler.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "Reconciler interval must be greater than 0".to_string(),
            ));
        }

        if self.playback.position_refresh_ms == 0 {
            return Err(ConfigError::Invalid(
                "Position refresh interval must be greater than 0".to_string(),
            ));
        }

        if self.playback.notification_buffer == 0 {
            return Err(ConfigError::Invalid(
                "Notification buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
