//! # PCBMill
//!
//! Fabricates printed-circuit boards on a Grbl mill driven through a local
//! controller bridge: aligning stock, probing surfaces, transforming and
//! re-positioning Gerber/drill artwork, and drilling.
//!
//! ## Architecture
//!
//! PCBMill is organized as a workspace with multiple crates:
//!
//! 1. **pcbmill-core** - Value types, errors, the session event bus
//! 2. **pcbmill-communication** - Bridge transport, Grbl protocol, machine session
//! 3. **pcbmill-camtools** - Gerber/Excellon parsing, geometry, transform pipeline
//! 4. **pcbmill-settings** - Configuration files
//! 5. **pcbmill** - Fabrication workflows and the command-line binary

pub mod fabrication;
pub mod prepare;
pub mod toolpath;

pub use pcbmill_camtools as camtools;
pub use pcbmill_communication as communication;
pub use pcbmill_settings as settings;

pub use pcbmill_core::{
    ActiveState, ConnectionError, ControllerError, Error, GeometryError, Position, ProbeResult,
    Result, SessionEvent, Units, WorkCoordinateSystem,
};

pub use fabrication::{DrillParams, DrillReport, FabricationOrchestrator, SurfacePoint};
pub use prepare::{build_pipeline, prepare_project, PreparedProject};
pub use toolpath::{ExternalToolpathGenerator, ToolpathGenerator};

use pcbmill_communication::{JogTier, JogTiers, SessionConfig};
use pcbmill_settings::MachineSettings;
use std::time::Duration;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output on stderr, so command output on stdout stays clean
/// - RUST_LOG environment variable support, `info` otherwise
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Session settings from the machine section of the configuration
pub fn session_config_from(machine: &MachineSettings) -> SessionConfig {
    let tier = |i: usize| JogTier {
        threshold: machine.jog_tiers[i].threshold,
        multiplier: machine.jog_tiers[i].multiplier,
        feed: machine.jog_tiers[i].feed,
    };
    SessionConfig {
        auto_reset: machine.auto_reset,
        auto_reset_trigger: machine.auto_reset_trigger.clone(),
        jog_tiers: JogTiers {
            fast: tier(0),
            medium: tier(1),
            slow: tier(2),
        },
        poll_interval: Duration::from_millis(machine.poll_interval_ms),
        state_timeout: Duration::from_millis(machine.state_timeout_ms),
        feeder_reset_timeout: Duration::from_millis(machine.feeder_reset_timeout_ms),
        probe_timeout: Duration::from_millis(machine.probe_timeout_ms),
        ..SessionConfig::default()
    }
}
