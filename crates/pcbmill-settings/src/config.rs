//! Configuration for PCBMill
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML files; the default location is `pcbmill/config.toml` under the
//! platform configuration directory.
//!
//! Configuration is organized into logical sections:
//! - Bridge settings (host, port, connect timeout)
//! - Machine settings (auto reset, probing, jog tiers, wait timeouts)
//! - Fabrication settings (stock, copper placement, outputs, toolpath tool)

use crate::error::{ConfigError, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Connection to the local controller bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Bridge host name or address
    pub host: String,
    /// Bridge TCP port
    pub port: u16,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            connect_timeout_ms: 5000,
        }
    }
}

impl BridgeSettings {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One jog speed tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JogTierSettings {
    /// Deflection above which the tier applies
    pub threshold: f64,
    /// Step multiplier
    pub multiplier: f64,
    /// Feed rate, mm/min
    pub feed: f64,
}

/// Machine behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineSettings {
    /// Send a reset when the firmware asks for one
    pub auto_reset: bool,
    /// Text of the `[MSG:]` notice that triggers an automatic reset
    pub auto_reset_trigger: String,
    /// Safe travel height, mm
    pub safe_z: f64,
    /// Probe feed rate, mm/min
    pub probe_feed: f64,
    /// Maximum probe travel, mm
    pub probe_depth: f64,
    /// Timeout for state waits
    pub state_timeout_ms: u64,
    /// Timeout for each feeder reset step
    pub feeder_reset_timeout_ms: u64,
    /// Timeout for a probe cycle
    pub probe_timeout_ms: u64,
    /// Poll interval of wait primitives
    pub poll_interval_ms: u64,
    /// Jog tiers, fastest first
    pub jog_tiers: [JogTierSettings; 3],
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            auto_reset: false,
            auto_reset_trigger: "Reset to continue".to_string(),
            safe_z: 5.0,
            probe_feed: 100.0,
            probe_depth: 5.0,
            state_timeout_ms: 30_000,
            feeder_reset_timeout_ms: 5_000,
            probe_timeout_ms: 60_000,
            poll_interval_ms: 100,
            jog_tiers: [
                JogTierSettings {
                    threshold: 0.8,
                    multiplier: 2.0,
                    feed: 500.0,
                },
                JogTierSettings {
                    threshold: 0.5,
                    multiplier: 1.0,
                    feed: 250.0,
                },
                JogTierSettings {
                    threshold: 0.0,
                    multiplier: 0.5,
                    feed: 100.0,
                },
            ],
        }
    }
}

/// Stock and output preparation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricationSettings {
    /// Stock width, mm
    pub stock_width: f64,
    /// Stock height, mm
    pub stock_height: f64,
    /// Copper placement policy name (`natural`, `center-all`, ...)
    pub copper_policy: String,
    /// Mirror about the vertical center line
    pub mirror_x: bool,
    /// Mirror about the horizontal center line
    pub mirror_y: bool,
    /// Where prepared files are written
    pub output_dir: PathBuf,
    /// External toolpath generator executable, if any
    pub toolpath_command: Option<String>,
}

impl Default for FabricationSettings {
    fn default() -> Self {
        Self {
            stock_width: 100.0,
            stock_height: 70.0,
            copper_policy: "natural".to_string(),
            mirror_x: false,
            mirror_y: false,
            output_dir: PathBuf::from("out"),
            toolpath_command: None,
        }
    }
}

/// Complete application configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bridge connection
    pub bridge: BridgeSettings,
    /// Machine behaviour
    pub machine: MachineSettings,
    /// Fabrication defaults
    pub fabrication: FabricationSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> Result<Format, ConfigError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Format::Json),
        Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(Format::Toml),
        _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
    }
}

/// `<config dir>/pcbmill/config.toml`
pub fn default_config_path() -> SettingsResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("pcbmill").join("config.toml"))
        .ok_or_else(|| {
            SettingsError::ConfigDirectory("no configuration directory on this platform".to_string())
        })
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = fs::read_to_string(path).map_err(|source| SettingsError::LoadError {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path` when it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        let save_error = |source| SettingsError::SaveError {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(save_error)?;
        }
        fs::write(path, content).map_err(save_error)?;

        debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Bridge
        if self.bridge.host.trim().is_empty() {
            return Err(ConfigError::MissingValue("bridge.host".to_string()));
        }
        if self.bridge.port == 0 {
            return Err(ConfigError::out_of_range("bridge.port", self.bridge.port));
        }
        if self.bridge.connect_timeout_ms == 0 {
            return Err(ConfigError::out_of_range(
                "bridge.connect_timeout_ms",
                self.bridge.connect_timeout_ms,
            ));
        }

        // Machine
        let m = &self.machine;
        if !(m.safe_z.is_finite() && m.safe_z > 0.0) {
            return Err(ConfigError::out_of_range("machine.safe_z", m.safe_z));
        }
        if !(m.probe_feed.is_finite() && m.probe_feed > 0.0) {
            return Err(ConfigError::out_of_range("machine.probe_feed", m.probe_feed));
        }
        if !(m.probe_depth.is_finite() && m.probe_depth > 0.0) {
            return Err(ConfigError::out_of_range("machine.probe_depth", m.probe_depth));
        }
        for (key, value) in [
            ("machine.state_timeout_ms", m.state_timeout_ms),
            ("machine.feeder_reset_timeout_ms", m.feeder_reset_timeout_ms),
            ("machine.probe_timeout_ms", m.probe_timeout_ms),
            ("machine.poll_interval_ms", m.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::out_of_range(key, value));
            }
        }
        for (i, tier) in m.jog_tiers.iter().enumerate() {
            if !(tier.feed > 0.0 && tier.multiplier > 0.0 && tier.threshold >= 0.0) {
                return Err(ConfigError::out_of_range(
                    &format!("machine.jog_tiers[{}]", i),
                    format!("{:?}", tier),
                ));
            }
        }
        if m.jog_tiers
            .windows(2)
            .any(|pair| pair[0].threshold < pair[1].threshold)
        {
            return Err(ConfigError::out_of_range(
                "machine.jog_tiers",
                "thresholds must not increase",
            ));
        }

        // Fabrication
        let f = &self.fabrication;
        if !(f.stock_width.is_finite() && f.stock_width > 0.0) {
            return Err(ConfigError::out_of_range("fabrication.stock_width", f.stock_width));
        }
        if !(f.stock_height.is_finite() && f.stock_height > 0.0) {
            return Err(ConfigError::out_of_range("fabrication.stock_height", f.stock_height));
        }
        if f.copper_policy.trim().is_empty() {
            return Err(ConfigError::MissingValue("fabrication.copper_policy".to_string()));
        }

        Ok(())
    }
}
