//! # Session Event Bus
//!
//! Typed publish/subscribe channel for [`SessionEvent`]s. Each machine
//! session owns its own bus; there is no process-wide instance.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pcbmill_core::event_bus::{EventBus, EventCategory, EventFilter, SessionEvent};
//!
//! let bus = EventBus::new();
//! let id = bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Error]),
//!     |event| tracing::warn!("{}", event.description()),
//! );
//!
//! // Async consumers poll a broadcast receiver instead
//! let mut rx = bus.receiver();
//!
//! bus.unsubscribe(id);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
