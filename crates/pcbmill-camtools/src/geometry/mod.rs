//! Plane geometry: points, affine transforms, bounding boxes and the
//! two-point deskew solver.

mod bbox;
mod deskew;
mod transform;

pub use bbox::BoundingBox;
pub use deskew::{deskew, normalize_angle, DeskewResult, DEGENERATE_EPSILON};
pub use transform::{AffineTransform, Point, Size};
