//! Data models for positions, controller state and probe results
//!
//! This module provides:
//! - Position tracking for the three milling axes
//! - The Grbl active-state enumeration
//! - The bulk sender lifecycle status
//! - Probe results parsed from `[PRB:...]` feedback
//! - Work coordinate system selectors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position in machine or work coordinates (millimeters)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
}

impl Position {
    /// Create a new position with X, Y, Z coordinates
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        debug_assert!(
            x.is_finite() && y.is_finite() && z.is_finite(),
            "Position axes must be finite: x={x}, y={y}, z={z}"
        );
        Self { x, y, z }
    }

    /// Parse a comma separated `x,y,z` triple as found in status reports
    pub fn parse(pos_str: &str) -> Option<Self> {
        let coords: Vec<f64> = pos_str
            .split(',')
            .filter_map(|s| s.trim().parse::<f64>().ok())
            .collect();

        if coords.len() < 3 {
            return None;
        }

        Some(Self {
            x: coords[0],
            y: coords[1],
            z: coords[2],
        })
    }

    /// Calculate distance to another position (XYZ)
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X:{:.3} Y:{:.3} Z:{:.3}", self.x, self.y, self.z)
    }
}

/// Grbl active state as reported by the controller
///
/// `Resetting` is never reported by the firmware; the session sets it
/// locally the instant a soft reset is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActiveState {
    /// Ready for commands
    Idle,
    /// Executing motion
    Run,
    /// Feed hold in effect
    Hold,
    /// Safety door open
    Door,
    /// Homing cycle in progress
    Home,
    /// Low-power sleep
    Sleep,
    /// Alarm lock, requires unlock or reset
    Alarm,
    /// G-code check mode
    Check,
    /// Jogging
    Jog,
    /// Soft reset issued, waiting for the controller to come back
    Resetting,
}

impl ActiveState {
    /// States in which a jog command is accepted
    pub fn is_jog_eligible(&self) -> bool {
        matches!(self, ActiveState::Idle | ActiveState::Jog)
    }

    /// Check if this state indicates active motion
    pub fn is_moving(&self) -> bool {
        matches!(self, ActiveState::Run | ActiveState::Jog | ActiveState::Home)
    }

    /// Check if this state indicates an error condition
    pub fn is_error(&self) -> bool {
        matches!(self, ActiveState::Alarm | ActiveState::Door)
    }
}

impl fmt::Display for ActiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActiveState::Idle => "Idle",
            ActiveState::Run => "Run",
            ActiveState::Hold => "Hold",
            ActiveState::Door => "Door",
            ActiveState::Home => "Home",
            ActiveState::Sleep => "Sleep",
            ActiveState::Alarm => "Alarm",
            ActiveState::Check => "Check",
            ActiveState::Jog => "Jog",
            ActiveState::Resetting => "Resetting",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ActiveState {
    type Err = String;

    /// Grbl appends sub-states (`Hold:0`, `Door:1`); only the prefix matters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.split(':').next().unwrap_or_default().trim();
        match name {
            "Idle" => Ok(ActiveState::Idle),
            "Run" => Ok(ActiveState::Run),
            "Hold" => Ok(ActiveState::Hold),
            "Door" => Ok(ActiveState::Door),
            "Home" => Ok(ActiveState::Home),
            "Sleep" => Ok(ActiveState::Sleep),
            "Alarm" => Ok(ActiveState::Alarm),
            "Check" => Ok(ActiveState::Check),
            "Jog" => Ok(ActiveState::Jog),
            "Resetting" => Ok(ActiveState::Resetting),
            other => Err(format!("Unknown controller state: {}", other)),
        }
    }
}

/// Bridge workflow state driving the bulk sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// Nothing streaming
    Idle,
    /// Sender streaming
    Running,
    /// Sender paused
    Paused,
}

/// Lifecycle of the bulk file sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderStatus {
    /// No program loaded
    Empty,
    /// Program loaded, not started
    Loaded,
    /// Streaming
    Running,
    /// Streaming paused
    Paused,
    /// Program streamed to completion
    Done,
}

impl fmt::Display for SenderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Result of a `G38.x` probe cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Machine X at trigger
    pub x: f64,
    /// Machine Y at trigger
    pub y: f64,
    /// Machine Z at trigger
    pub z: f64,
    /// True when the probe actually touched
    pub ok: bool,
}

impl ProbeResult {
    /// Position part of the result
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

/// Coordinate system selector for synthesized positioning commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkCoordinateSystem {
    /// Machine coordinates (`G53`, non-modal)
    Machine,
    /// Work coordinate system 1..=6 (`G54`..`G59`)
    Work(u8),
}

impl WorkCoordinateSystem {
    /// Default work coordinate system (`G54`)
    pub const DEFAULT: WorkCoordinateSystem = WorkCoordinateSystem::Work(1);

    /// G-code selector word, `None` when the index is outside 1..=6
    pub fn gcode(&self) -> Option<&'static str> {
        match self {
            WorkCoordinateSystem::Machine => Some("G53"),
            WorkCoordinateSystem::Work(n) => match n {
                1 => Some("G54"),
                2 => Some("G55"),
                3 => Some("G56"),
                4 => Some("G57"),
                5 => Some("G58"),
                6 => Some("G59"),
                _ => None,
            },
        }
    }

    /// `P` word used by `G10 L2/L20` for this system
    pub fn p_index(&self) -> Option<u8> {
        match self {
            WorkCoordinateSystem::Machine => None,
            WorkCoordinateSystem::Work(n) if (1..=6).contains(n) => Some(*n),
            WorkCoordinateSystem::Work(_) => None,
        }
    }
}

impl Default for WorkCoordinateSystem {
    fn default() -> Self {
        Self::DEFAULT
    }
}
