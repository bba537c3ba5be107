//! Firmware protocol handling
//!
//! Only Grbl is spoken; the bridge forwards its serial stream verbatim.

pub mod grbl;
