//! Gerber and Excellon artwork
//!
//! - [`record`]: line parser producing typed records
//! - [`classify`]: file kind detection
//! - [`dataset`]: tools, holes and bounding boxes of a set of files
//! - [`stream`]: coordinate rewriting through an affine transform

pub mod classify;
pub mod dataset;
pub mod record;
pub mod stream;

pub use classify::{classify_content, classify_file, classify_name, FileKind};
pub use dataset::{CopperBoxes, GerberDataset, Hole, LoadedFile, RenderSummary, ToolDefinition};
pub use record::{
    ApertureShape, CoordinateFormat, GerberRecord, OpKind, Property, RecordParser, RecordStream,
};
pub use stream::{ArtworkFormat, GerberStreamTransformer, TransformOptions, TransformStats};
