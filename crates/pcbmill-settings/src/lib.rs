//! PCBMill Settings Crate
//!
//! Loads, validates and saves the configuration that every other part of
//! the system is constructed from. Nothing here is global: the binary loads
//! one [`Config`] at startup and passes it down.

pub mod config;
pub mod error;

pub use config::{
    default_config_path, BridgeSettings, Config, FabricationSettings, JogTierSettings,
    MachineSettings,
};
pub use error::{ConfigError, SettingsError, SettingsResult};
