//! # PCBMill Core
//!
//! Core value types, the error taxonomy and the typed session event bus
//! shared by the machine session, the Gerber transform engine and the
//! fabrication workflows.

pub mod data;
pub mod error;
pub mod event_bus;
pub mod units;

pub use data::{
    ActiveState, Position, ProbeResult, SenderStatus, WorkCoordinateSystem, WorkflowState,
};

pub use error::{ConnectionError, ControllerError, Error, GeometryError, Result};

pub use event_bus::{
    EventBus, EventBusConfig, EventCategory, EventFilter, SessionEvent, SubscriptionId,
};

pub use units::Units;
