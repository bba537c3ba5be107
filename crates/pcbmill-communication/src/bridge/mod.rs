//! Bridge vocabulary and transport abstraction
//!
//! The controller is reached through a local bridge process that owns the
//! serial port. The session talks to it with a small command vocabulary
//! and receives a stream of typed events back.

pub mod tcp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pcbmill_core::{Position, Result, WorkflowState};
use serde::{Deserialize, Serialize};

pub use tcp::TcpBridgeTransport;

/// Command issued to the bridge
///
/// Serialized as `{"cmd": "<name>", "args": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "args")]
pub enum BridgeCommand {
    /// Run the homing cycle (`$H`)
    #[serde(rename = "homing")]
    Homing,
    /// Clear an alarm lock (`$X`)
    #[serde(rename = "unlock")]
    Unlock,
    /// Soft reset (Ctrl-X)
    #[serde(rename = "reset")]
    Reset,
    /// Request a status report (`?`)
    #[serde(rename = "statusreport")]
    StatusReport,
    /// Feed hold (`!`)
    #[serde(rename = "feedhold")]
    FeedHold,
    /// Cycle start / resume (`~`)
    #[serde(rename = "cyclestart")]
    CycleStart,
    /// Let the feeder drain its queue
    #[serde(rename = "feeder:start")]
    FeederStart,
    /// Stop the feeder, dropping queued commands
    #[serde(rename = "feeder:stop")]
    FeederStop,
    /// Load a program into the sender
    #[serde(rename = "gcode:load")]
    GcodeLoad {
        /// Program name shown by the bridge.
        name: String,
        /// Program text.
        gcode: String,
    },
    /// Unload the sender program
    #[serde(rename = "gcode:unload")]
    GcodeUnload,
    /// Start streaming the loaded program
    #[serde(rename = "gcode:start")]
    GcodeStart,
    /// Stop streaming
    #[serde(rename = "gcode:stop")]
    GcodeStop {
        /// Also reset the controller.
        force: bool,
    },
    /// Pause streaming
    #[serde(rename = "gcode:pause")]
    GcodePause,
    /// Resume streaming
    #[serde(rename = "gcode:resume")]
    GcodeResume,
    /// Queue one or more newline-joined lines on the feeder
    #[serde(rename = "gcode")]
    Gcode(String),
    /// Cancel an in-progress jog (realtime `0x85`)
    #[serde(rename = "jogCancel")]
    JogCancel,
}

impl BridgeCommand {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            BridgeCommand::Homing => "homing",
            BridgeCommand::Unlock => "unlock",
            BridgeCommand::Reset => "reset",
            BridgeCommand::StatusReport => "statusreport",
            BridgeCommand::FeedHold => "feedhold",
            BridgeCommand::CycleStart => "cyclestart",
            BridgeCommand::FeederStart => "feeder:start",
            BridgeCommand::FeederStop => "feeder:stop",
            BridgeCommand::GcodeLoad { .. } => "gcode:load",
            BridgeCommand::GcodeUnload => "gcode:unload",
            BridgeCommand::GcodeStart => "gcode:start",
            BridgeCommand::GcodeStop { .. } => "gcode:stop",
            BridgeCommand::GcodePause => "gcode:pause",
            BridgeCommand::GcodeResume => "gcode:resume",
            BridgeCommand::Gcode(_) => "gcode",
            BridgeCommand::JogCancel => "jogCancel",
        }
    }

    /// Build a feeder command from several lines
    pub fn gcode_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let joined = lines
            .iter()
            .map(|l| l.as_ref())
            .collect::<Vec<_>>()
            .join("\n");
        BridgeCommand::Gcode(joined)
    }
}

/// Event received from the bridge
///
/// Serialized as `{"event": "<name>", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Parsed controller status report
    ControllerState {
        /// Grbl active state string (`Idle`, `Hold:0`, ...).
        active_state: String,
        /// Machine position.
        mpos: Position,
        /// Work position.
        wpos: Position,
        /// Spindle speed, when reported.
        #[serde(default)]
        spindle: Option<f64>,
    },
    /// One raw line from the serial stream
    SerialData {
        /// Line text without terminator.
        line: String,
    },
    /// Bridge workflow state changed
    WorkflowState {
        /// New workflow state.
        state: WorkflowState,
    },
    /// Sender metadata
    SenderStatus {
        /// Program size in bytes, 0 when nothing is loaded.
        size: u64,
        /// Set once the program has streamed to completion.
        #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
        finish_time: Option<DateTime<Utc>>,
    },
    /// Feeder queue state
    FeederStatus {
        /// Lines waiting in the queue.
        queue: usize,
        /// A line has been written and not acknowledged.
        #[serde(default)]
        pending: bool,
    },
    /// Socket or bridge failure
    Error {
        /// Failure description.
        message: String,
    },
    /// Bridge closed the connection
    Close,
}

/// Outbound half of a bridge connection
///
/// Implementations only move bytes; all protocol state lives in the session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human readable endpoint description
    fn describe(&self) -> String;

    /// Write one command
    async fn send(&self, command: BridgeCommand) -> Result<()>;

    /// Resolve once every write issued so far has left the process
    async fn drain(&self) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_string(&BridgeCommand::FeederStart).unwrap();
        assert_eq!(json, r#"{"cmd":"feeder:start"}"#);

        let json = serde_json::to_string(&BridgeCommand::Gcode("G0 X1".to_string())).unwrap();
        assert_eq!(json, r#"{"cmd":"gcode","args":"G0 X1"}"#);

        let json = serde_json::to_string(&BridgeCommand::GcodeStop { force: true }).unwrap();
        assert_eq!(json, r#"{"cmd":"gcode:stop","args":{"force":true}}"#);
    }

    #[test]
    fn test_gcode_lines_joined_by_newline() {
        let cmd = BridgeCommand::gcode_lines(&["G90", "G0 X1.000"]);
        assert_eq!(cmd, BridgeCommand::Gcode("G90\nG0 X1.000".to_string()));
        assert_eq!(cmd.name(), "gcode");
    }

    #[test]
    fn test_event_decoding() {
        let event: BridgeEvent =
            serde_json::from_str(r#"{"event":"sender_status","size":120,"finish_time":1700000000000}"#)
                .unwrap();
        match event {
            BridgeEvent::SenderStatus { size, finish_time } => {
                assert_eq!(size, 120);
                assert!(finish_time.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }

        let event: BridgeEvent =
            serde_json::from_str(r#"{"event":"workflow_state","state":"paused"}"#).unwrap();
        assert_eq!(
            event,
            BridgeEvent::WorkflowState {
                state: WorkflowState::Paused
            }
        );

        let event: BridgeEvent = serde_json::from_str(r#"{"event":"close"}"#).unwrap();
        assert_eq!(event, BridgeEvent::Close);
    }
}
