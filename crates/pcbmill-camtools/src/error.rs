//! Error types for the CAM tools crate.
//!
//! Parse problems inside a file are not errors here; they are collected as
//! warnings on the dataset. These types cover what aborts a whole operation:
//! unreadable files, geometric precondition violations, bad parameters.

use pcbmill_core::GeometryError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during CAM tool operations.
#[derive(Error, Debug)]
pub enum CamToolError {
    /// Invalid parameters were provided to a CAM tool.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// A file in a load request could not be opened.
    #[error("Failed to load {path}: {source}")]
    LoadError {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// A geometric precondition was violated.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A file format error occurred.
    #[error("File format error: {0}")]
    FileFormat(#[from] FileFormatError),
}

/// Errors related to file format recognition.
#[derive(Error, Debug)]
pub enum FileFormatError {
    /// The file kind could not be determined.
    #[error("Unrecognised artwork file: {0}")]
    Unclassified(String),

    /// The file is empty or contains no usable data.
    #[error("Empty file: {0}")]
    EmptyFile(String),

    /// A project has no file for the requested side.
    #[error("No {0} file in project")]
    MissingSide(String),
}

/// Result type alias for CAM tool operations.
pub type CamToolResult<T> = Result<T, CamToolError>;

impl CamToolError {
    /// Check if this is a geometric precondition violation
    pub fn is_geometry_error(&self) -> bool {
        matches!(self, CamToolError::Geometry(_))
    }
}

impl From<CamToolError> for pcbmill_core::Error {
    fn from(err: CamToolError) -> Self {
        match err {
            CamToolError::Geometry(e) => pcbmill_core::Error::Geometry(e),
            CamToolError::IoError(e) => pcbmill_core::Error::Io(e),
            CamToolError::SerializationError(e) => pcbmill_core::Error::Json(e),
            other => pcbmill_core::Error::other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cam_tool_error_display() {
        let err = CamToolError::InvalidParameters("stock width must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid parameters: stock width must be positive"
        );

        let err = CamToolError::LoadError {
            path: PathBuf::from("board-F_Cu.gbr"),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(err.to_string(), "Failed to load board-F_Cu.gbr: not found");
    }

    #[test]
    fn test_file_format_error_display() {
        let err = FileFormatError::Unclassified("notes.txt".to_string());
        assert_eq!(err.to_string(), "Unrecognised artwork file: notes.txt");

        let err = FileFormatError::MissingSide("drill".to_string());
        assert_eq!(err.to_string(), "No drill file in project");
    }

    #[test]
    fn test_error_conversion() {
        let geom = GeometryError::UnknownPolicy {
            name: "sideways".to_string(),
        };
        let cam_err: CamToolError = geom.clone().into();
        assert!(cam_err.is_geometry_error());

        let core_err: pcbmill_core::Error = cam_err.into();
        assert!(core_err.is_geometry_error());

        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let cam_err: CamToolError = io_err.into();
        assert!(matches!(cam_err, CamToolError::IoError(_)));
    }
}
