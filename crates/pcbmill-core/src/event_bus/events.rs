//! Session event definitions.
//!
//! Everything a [`MachineSession`](../../pcbmill_communication/index.html)
//! reports to its observers is one of these variants. Events are cloneable
//! and serializable so they can be logged or replayed.

use serde::{Deserialize, Serialize};

use crate::data::{ActiveState, Position, ProbeResult, SenderStatus};

/// Typed event emitted by the machine session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Transport attached
    Connected {
        /// Bridge address or transport description.
        address: String,
    },
    /// Transport detached
    Disconnected {
        /// Why the session went away.
        reason: String,
    },
    /// Session readiness flipped
    ReadyChanged(bool),
    /// Active state changed.
    ///
    /// `preliminary` is true when the state was derived from a data line or
    /// a local override rather than a controller-state report.
    StateChanged {
        /// New active state.
        state: ActiveState,
        /// Not yet confirmed by a controller-state report.
        preliminary: bool,
    },
    /// Machine or work position changed
    PositionChanged {
        /// Machine position.
        mpos: Position,
        /// Work position.
        wpos: Position,
    },
    /// Spindle speed changed
    SpindleChanged(f64),
    /// `ALARM:<code>` line received
    Alarm {
        /// Alarm code.
        code: u32,
        /// Human readable description.
        message: String,
    },
    /// `[MSG:...]` notice
    Message(String),
    /// `error:` response from the firmware
    FirmwareError(String),
    /// `[PRB:...]` result
    Probe(ProbeResult),
    /// Firmware start-up banner seen (controller was reset)
    FirmwareReset {
        /// Banner text.
        banner: String,
    },
    /// Raw serial data line, after normalization handling
    Data(String),
    /// Derived sender status changed
    SenderStatusChanged(SenderStatus),
    /// Feeder queue pending flag changed
    FeederChanged {
        /// Commands are queued or in flight.
        pending: bool,
    },
    /// Transport-level error; the session has already disconnected
    TransportError(String),
}

impl SessionEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            SessionEvent::Connected { .. }
            | SessionEvent::Disconnected { .. }
            | SessionEvent::ReadyChanged(_) => EventCategory::Connection,
            SessionEvent::StateChanged { .. }
            | SessionEvent::PositionChanged { .. }
            | SessionEvent::SpindleChanged(_)
            | SessionEvent::Probe(_)
            | SessionEvent::FirmwareReset { .. } => EventCategory::Machine,
            SessionEvent::Message(_) | SessionEvent::Data(_) => EventCategory::Data,
            SessionEvent::SenderStatusChanged(_) | SessionEvent::FeederChanged { .. } => {
                EventCategory::Sender
            }
            SessionEvent::Alarm { .. }
            | SessionEvent::FirmwareError(_)
            | SessionEvent::TransportError(_) => EventCategory::Error,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            SessionEvent::Connected { address } => format!("Connected to {}", address),
            SessionEvent::Disconnected { reason } => format!("Disconnected: {}", reason),
            SessionEvent::ReadyChanged(ready) => format!("Ready: {}", ready),
            SessionEvent::StateChanged { state, preliminary } => {
                if *preliminary {
                    format!("State: {} (preliminary)", state)
                } else {
                    format!("State: {}", state)
                }
            }
            SessionEvent::PositionChanged { mpos, wpos } => {
                format!("Position - Machine: {}, Work: {}", mpos, wpos)
            }
            SessionEvent::SpindleChanged(speed) => format!("Spindle: {} RPM", speed),
            SessionEvent::Alarm { code, message } => format!("Alarm {} ({})", code, message),
            SessionEvent::Message(msg) => format!("Message: {}", msg),
            SessionEvent::FirmwareError(msg) => format!("Firmware error: {}", msg),
            SessionEvent::Probe(p) => format!(
                "Probe X:{:.3} Y:{:.3} Z:{:.3} ({})",
                p.x,
                p.y,
                p.z,
                if p.ok { "touch" } else { "no touch" }
            ),
            SessionEvent::FirmwareReset { banner } => format!("Firmware reset: {}", banner),
            SessionEvent::Data(line) => format!("Data: {}", line),
            SessionEvent::SenderStatusChanged(status) => format!("Sender: {}", status),
            SessionEvent::FeederChanged { pending } => format!("Feeder pending: {}", pending),
            SessionEvent::TransportError(msg) => format!("Transport error: {}", msg),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Connection lifecycle events.
    Connection,
    /// Machine state, position and probe events.
    Machine,
    /// Raw data and firmware messages.
    Data,
    /// Sender and feeder events.
    Sender,
    /// Alarms and errors.
    Error,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Machine => write!(f, "Machine"),
            EventCategory::Data => write!(f, "Data"),
            EventCategory::Sender => write!(f, "Sender"),
            EventCategory::Error => write!(f, "Error"),
        }
    }
}
