//! # PCBMill Communication
//!
//! Machine session for a Grbl controller behind the local serial bridge:
//! bridge command/event vocabulary, transports, Grbl data-line parsing, and
//! the [`MachineSession`] state machine with its wait primitives.

pub mod bridge;
pub mod firmware;
pub mod session;

pub use bridge::{BridgeCommand, BridgeEvent, TcpBridgeTransport, Transport};
pub use firmware::grbl::{parse_data_line, DataLine};
pub use session::{
    CancelFlag, JogTier, JogTiers, MachineSession, MachineState, OverrideSource, PendingOverride,
    SessionConfig,
};
