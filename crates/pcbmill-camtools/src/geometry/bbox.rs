//! Axis-aligned bounding boxes

use super::transform::{AffineTransform, Point, Size};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
///
/// Starts empty (`min = +inf`, `max = -inf`) and only ever grows through
/// [`BoundingBox::check_coord`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Lower-left corner
    pub min: Point,
    /// Upper-right corner
    pub max: Point,
}

impl BoundingBox {
    /// Creates an empty bounding box that will expand with the first `check_coord` call.
    pub const fn new() -> Self {
        Self {
            min: Point::new(f64::INFINITY, f64::INFINITY),
            max: Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Box spanning two corners in any order
    pub fn from_corners(a: Point, b: Point) -> Self {
        let mut bbox = Self::new();
        bbox.check_coord(a);
        bbox.check_coord(b);
        bbox
    }

    /// At least one coordinate has been observed
    pub fn valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    /// `Some(self)` when valid
    pub fn as_valid(&self) -> Option<&Self> {
        self.valid().then_some(self)
    }

    /// Widen the box to include `p`; non-finite points are ignored
    pub fn check_coord(&mut self, p: Point) {
        if !(p.x.is_finite() && p.y.is_finite()) {
            return;
        }
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    /// Widen the box to include a rectangle of half-extent `(hx, hy)` around `p`
    pub fn check_padded(&mut self, p: Point, hx: f64, hy: f64) {
        self.check_coord(Point::new(p.x - hx, p.y - hy));
        self.check_coord(Point::new(p.x + hx, p.y + hy));
    }

    /// Widen the box to cover `other`
    pub fn union(&mut self, other: &BoundingBox) {
        if other.valid() {
            self.check_coord(other.min);
            self.check_coord(other.max);
        }
    }

    /// `max - min`, zero when the box is empty
    pub fn size(&self) -> Size {
        if self.valid() {
            Size::new(self.max.x - self.min.x, self.max.y - self.min.y)
        } else {
            Size::default()
        }
    }

    /// Width along X
    pub fn width(&self) -> f64 {
        self.size().width
    }

    /// Height along Y
    pub fn height(&self) -> f64 {
        self.size().height
    }

    /// Midpoint of the box
    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    /// Box with X and Y roles exchanged, as after a quarter turn
    pub fn swap_axes(&self) -> BoundingBox {
        if !self.valid() {
            return *self;
        }
        BoundingBox {
            min: Point::new(self.min.y, self.min.x),
            max: Point::new(self.max.y, self.max.x),
        }
    }

    /// Bounding box of this box's corners under `transform`
    pub fn transformed(&self, transform: &AffineTransform) -> BoundingBox {
        if !self.valid() {
            return *self;
        }
        let mut out = BoundingBox::new();
        for corner in [
            self.min,
            Point::new(self.max.x, self.min.y),
            self.max,
            Point::new(self.min.x, self.max.y),
        ] {
            out.check_coord(transform.apply(corner));
        }
        out
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new()
    }
}
