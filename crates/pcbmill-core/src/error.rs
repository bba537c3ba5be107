//! Error handling for PCBMill
//!
//! Provides the error types for every layer of the system:
//! - Controller errors (session protocol, timeouts, cancellation)
//! - Connection errors (bridge transport)
//! - Geometry errors (degenerate inputs, malformed artwork preconditions)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Controller error type
///
/// Represents errors raised by the machine session while issuing commands
/// or waiting for the controller to reach a condition.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Session has no live transport
    #[error("Controller not connected")]
    NotConnected,

    /// A wait primitive exceeded its deadline
    #[error("Timed out after {timeout_ms}ms waiting for {waiting_for}")]
    Timeout {
        /// Description of the awaited condition.
        waiting_for: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// A wait was abandoned because the caller raised its cancel flag
    #[error("Cancelled while waiting for {waiting_for}")]
    Cancelled {
        /// Description of the awaited condition.
        waiting_for: String,
    },

    /// One step of the feeder reset sequence failed
    #[error("Feeder reset aborted at step '{step}': {source}")]
    FeederReset {
        /// Name of the failing step.
        step: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Alarm condition reported by the firmware
    #[error("Alarm: {code} - {message}")]
    Alarm {
        /// The alarm code.
        code: u32,
        /// The alarm message.
        message: String,
    },

    /// Probe cycle ended without a touch
    #[error("Probe failed: {reason}")]
    ProbeFailed {
        /// The reason the probe operation failed.
        reason: String,
    },

    /// A command parameter was out of range
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Connection error type
///
/// Represents failures of the transport to the local controller bridge.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Failed to open the bridge connection
    #[error("Failed to connect to {address}: {reason}")]
    FailedToOpen {
        /// Bridge address.
        address: String,
        /// The reason the connection failed.
        reason: String,
    },

    /// Connection dropped after it was established
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// The bridge sent something we could not decode
    #[error("Bridge protocol error: {reason}")]
    Protocol {
        /// Decoder message.
        reason: String,
    },
}

/// Geometry error type
///
/// Precondition violations of a single transform or deskew computation.
/// Fatal to that operation only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Two-point solve received coincident or zero-length inputs
    #[error("Degenerate input: {reason}")]
    DegenerateInput {
        /// What made the input degenerate.
        reason: String,
    },

    /// A Gerber coordinate appeared before any `%FS` line
    #[error("Coordinate data at line {line_number} precedes the format specification")]
    MissingFormatSpec {
        /// 1-based line number of the offending coordinate.
        line_number: usize,
    },

    /// Unknown copper placement policy name
    #[error("Unknown placement policy: {name}")]
    UnknownPolicy {
        /// The rejected policy name.
        name: String,
    },

    /// A size or bounding box needed by a stateful stage was not available
    #[error("Invalid size: {reason}")]
    InvalidSize {
        /// Why the size could not be used.
        reason: String,
    },
}

/// Main error type for PCBMill
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Geometry error
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON document error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    ///
    /// Looks through an aborted feeder reset to the step that failed.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Controller(ControllerError::Timeout { .. }) => true,
            Error::Controller(ControllerError::FeederReset { source, .. }) => source.is_timeout(),
            _ => false,
        }
    }

    /// Check if a wait was cancelled by its caller
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Controller(ControllerError::Cancelled { .. }) => true,
            Error::Controller(ControllerError::FeederReset { source, .. }) => source.is_cancelled(),
            _ => false,
        }
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Controller(ControllerError::NotConnected)
        )
    }

    /// Check if this is a geometry error
    pub fn is_geometry_error(&self) -> bool {
        matches!(self, Error::Geometry(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_and_predicate() {
        let err: Error = ControllerError::Timeout {
            waiting_for: "state Hold".to_string(),
            timeout_ms: 5000,
        }
        .into();
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
        assert_eq!(
            err.to_string(),
            "Timed out after 5000ms waiting for state Hold"
        );
    }

    #[test]
    fn test_feeder_reset_keeps_its_cause() {
        let cause: Error = ControllerError::Timeout {
            waiting_for: "hold".to_string(),
            timeout_ms: 200,
        }
        .into();
        let err: Error = ControllerError::FeederReset {
            step: "wait for hold",
            source: Box::new(cause),
        }
        .into();
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
        assert_eq!(
            err.to_string(),
            "Feeder reset aborted at step 'wait for hold': Timed out after 200ms waiting for hold"
        );

        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("Timed out after 200ms waiting for hold")
        );

        let cancelled: Error = ControllerError::FeederReset {
            step: "wait for release",
            source: Box::new(
                ControllerError::Cancelled {
                    waiting_for: "release from hold".to_string(),
                }
                .into(),
            ),
        }
        .into();
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_timeout());
    }

    #[test]
    fn test_not_connected_is_connection_error() {
        let err: Error = ControllerError::NotConnected.into();
        assert!(err.is_connection_error());
        let err: Error = ConnectionError::ConnectionLost {
            reason: "reset by peer".to_string(),
        }
        .into();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_geometry_error_display() {
        let err = GeometryError::MissingFormatSpec { line_number: 3 };
        assert_eq!(
            err.to_string(),
            "Coordinate data at line 3 precedes the format specification"
        );
        let err: Error = err.into();
        assert!(err.is_geometry_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.gbr");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
