//! Service settings

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use relay_detect::{HardwareBackend, ProbeConfig, ScannerConfig, SerialBackend, TransactionConfig};
use relay_dispatch::DispatchConfig;
use relay_protocol::DEFAULT_BAUD_RATE;
use relay_sim::{SimBackend, SimPortConfig};
use serde::{Deserialize, Serialize};

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// HTTP port
    pub port: u16,
    /// Serial baud rate for probes and commands
    pub baud_rate: u32,
    /// Deadline for a port open in milliseconds
    pub open_timeout_ms: u64,
    /// Response window for a command in milliseconds
    pub response_timeout_ms: u64,
    /// Response window for a greeting probe in milliseconds
    pub probe_timeout_ms: u64,
    /// Ports whose name contains any of these are never probed
    pub skip_patterns: Vec<String>,
    /// Send every device the host time after each scan
    pub clock_sync: bool,
    /// Scan for devices when the server starts
    pub scan_on_startup: bool,
    /// Use virtual devices instead of serial hardware
    pub simulate: bool,
    /// Virtual devices for simulation mode
    pub simulated_ports: Vec<SimPortConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            baud_rate: DEFAULT_BAUD_RATE,
            open_timeout_ms: 1000,
            response_timeout_ms: 3000,
            probe_timeout_ms: 750,
            skip_patterns: vec!["Bluetooth".to_string()],
            clock_sync: true,
            scan_on_startup: true,
            simulate: false,
            simulated_ports: SimPortConfig::default_bench(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for labrelay
    /// Uses $XDG_CONFIG_HOME/labrelay, falls back to ~/.config/labrelay
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("labrelay"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("labrelay"))
    }

    /// Get the default settings file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from the default path, falling back to defaults
    pub fn load() -> Self {
        Self::default_path()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Load settings from an explicit file
    ///
    /// Unlike [`Settings::load`], a missing or malformed file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Save settings to `path`, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;

        Ok(())
    }

    /// Dispatcher configuration derived from these settings
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            transaction: TransactionConfig {
                baud_rate: self.baud_rate,
                open_timeout: Duration::from_millis(self.open_timeout_ms),
                response_timeout: Duration::from_millis(self.response_timeout_ms),
            },
            scanner: ScannerConfig {
                skip_patterns: self.skip_patterns.clone(),
                probe: ProbeConfig {
                    baud_rate: self.baud_rate,
                    open_timeout: Duration::from_millis(self.open_timeout_ms),
                    timeout: Duration::from_millis(self.probe_timeout_ms),
                },
            },
            clock_sync: self.clock_sync,
            ..Default::default()
        }
    }

    /// Serial backend selected by these settings
    pub fn backend(&self) -> Result<Arc<dyn SerialBackend>> {
        if self.simulate {
            let backend = SimBackend::from_config(&self.simulated_ports)
                .context("Invalid simulated port layout")?;
            Ok(Arc::new(backend))
        } else {
            Ok(Arc::new(HardwareBackend::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"port": 9000, "simulate": true}"#).unwrap();

        assert_eq!(settings.port, 9000);
        assert!(settings.simulate);
        assert_eq!(settings.response_timeout_ms, 3000);
        assert_eq!(settings.skip_patterns, vec!["Bluetooth"]);
    }

    #[test]
    fn test_save_and_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            port: 8181,
            clock_sync: false,
            ..Default::default()
        };

        settings.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_load_from_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(Settings::load_from(&path).is_err());
        assert!(Settings::load_from(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_dispatch_config_carries_timeouts() {
        let settings = Settings {
            response_timeout_ms: 1500,
            probe_timeout_ms: 300,
            ..Default::default()
        };

        let config = settings.dispatch_config();

        assert_eq!(config.transaction.response_timeout, Duration::from_millis(1500));
        assert_eq!(config.scanner.probe.timeout, Duration::from_millis(300));
        assert_eq!(config.transaction.baud_rate, 9600);
    }

    #[test]
    fn test_simulated_backend_lists_bench() {
        let settings = Settings {
            simulate: true,
            ..Default::default()
        };

        let ports = settings.backend().unwrap().list_ports().unwrap();

        assert_eq!(ports.len(), 4);
    }
}
