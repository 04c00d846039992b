//! Application settings

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mockpi_broker::BrokerConfig;
use mockpi_bus::BusConfig;
use mockpi_protocol::DeviceAddress;
use serde::{Deserialize, Serialize};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub format: LogFormat,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Backend used by read, write, lasers and watch
    #[serde(default)]
    pub bus: BusConfig,
    /// Endpoints for `mockpi broker` (and the worker endpoint for `mockpi worker`)
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Device names accepted wherever an address is expected
    #[serde(default = "default_devices")]
    pub devices: BTreeMap<String, DeviceAddress>,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Poll rate for `mockpi watch`
    #[serde(default = "default_watch_fps")]
    pub watch_fps: u32,
}

fn default_devices() -> BTreeMap<String, DeviceAddress> {
    BTreeMap::from([("lasers".to_string(), DeviceAddress(0x3a))])
}

fn default_watch_fps() -> u32 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            broker: BrokerConfig::default(),
            devices: default_devices(),
            logging: LoggingSettings::default(),
            watch_fps: default_watch_fps(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for mockpi
    /// Uses $XDG_CONFIG_HOME/mockpi, falls back to ~/.config/mockpi
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("mockpi"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("mockpi"))
    }

    /// Default settings file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings
    ///
    /// An explicit path must exist. Without one, a missing default file
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::parse(&json).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    /// Parse settings from JSON, defaulting missing fields
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Save settings, returning the path written
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path().context("Could not determine settings path")?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;

        Ok(path)
    }

    /// Resolve a device name from the table, or a numeric address
    pub fn resolve_device(&self, name: &str) -> Result<DeviceAddress> {
        if let Some(address) = self.devices.get(name) {
            return Ok(*address);
        }
        name.parse()
            .with_context(|| format!("Unknown device {name:?} (not in the device table, not an address)"))
    }

    /// Display name for an address: its table name if it has one
    pub fn device_name(&self, address: DeviceAddress) -> String {
        self.devices
            .iter()
            .find(|(_, a)| **a == address)
            .map(|(name, _)| format!("{name} ({address})"))
            .unwrap_or_else(|| address.to_string())
    }
}

#[cfg(test)]
mod tests {
    use mockpi_bus::Backend;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::parse("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.devices.get("lasers"), Some(&DeviceAddress(0x3a)));
        assert_eq!(settings.watch_fps, 60);
        assert_eq!(settings.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_partial_settings() {
        let settings = Settings::parse(
            r#"{
                "bus": { "backend": "relay" },
                "devices": { "arduino": 8 },
                "logging": { "format": "json" }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.bus.backend, Backend::Relay);
        assert_eq!(settings.devices.len(), 1);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_resolve_device() {
        let settings = Settings::default();
        assert_eq!(settings.resolve_device("lasers").unwrap(), DeviceAddress(0x3a));
        assert_eq!(settings.resolve_device("0x08").unwrap(), DeviceAddress(8));
        assert_eq!(settings.resolve_device("12").unwrap(), DeviceAddress(12));
        assert!(settings.resolve_device("toaster").is_err());
        assert!(settings.resolve_device("256").is_err());
    }

    #[test]
    fn test_device_name() {
        let settings = Settings::default();
        assert_eq!(settings.device_name(DeviceAddress(0x3a)), "lasers (0x3a)");
        assert_eq!(settings.device_name(DeviceAddress(1)), "0x01");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mockpi").join("settings.json");

        let mut settings = Settings::default();
        settings.watch_fps = 30;
        settings.devices.insert("arduino".to_string(), DeviceAddress(8));

        assert_eq!(settings.save(Some(&path)).unwrap(), path);
        assert_eq!(Settings::load(Some(&path)).unwrap(), settings);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("mockpi-definitely-missing.json");
        assert!(Settings::load(Some(&path)).is_err());
    }
}
