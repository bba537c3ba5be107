//! # PCBMill CAM Tools
//!
//! Artwork side of PCB fabrication: reading Gerber and Excellon files,
//! measuring them, and rewriting their coordinates so the board lands where
//! it should on the stock.
//!
//! ## Modules
//!
//! - **Geometry**: points, affine transforms, bounding boxes, two-point deskew
//! - **Gerber**: record parser, file classification, dataset, stream rewriter
//! - **Project**: per-board file mapping, lazy dataset, cache document
//! - **Pipeline**: ordered rotate/mirror/position/deskew stages and output preparation

pub mod error;
pub mod geometry;
pub mod gerber;
pub mod pipeline;
pub mod project;

// Re-export commonly used items
pub use error::{CamToolError, CamToolResult, FileFormatError};
pub use geometry::{deskew, AffineTransform, BoundingBox, DeskewResult, Point, Size};
pub use gerber::{
    ArtworkFormat, FileKind, GerberDataset, GerberRecord, GerberStreamTransformer, Hole,
    RenderSummary, TransformOptions, TransformStats,
};
pub use pipeline::{CopperPolicy, PreparedOutputs, TransformPipeline};
pub use project::{derive_project_id, Project, ProjectCache, ProjectCacheDocument, Side};
