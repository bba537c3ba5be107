//! 2D affine transforms
//!
//! Homogeneous 3x3 matrices with the bottom row fixed at `[0, 0, 1]`.
//! `compose(a, b)` applies `b` first, then `a`.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 2D point, millimeters unless stated otherwise
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point {
    /// Create a point
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Component-wise difference `self - other`
    pub fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    /// Component-wise sum
    pub fn add(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    /// Euclidean length of the vector from the origin
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Direction angle of the vector from the origin (radians)
    pub fn angle(self) -> f64 {
        self.y.atan2(self.x)
    }

    /// Distance to another point
    pub fn distance_to(self, other: Point) -> f64 {
        self.sub(other).length()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// Width and height of a board or stock sheet
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    /// Extent along X
    pub width: f64,
    /// Extent along Y
    pub height: f64,
}

impl Size {
    /// Create a size
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Both extents are finite and strictly positive
    pub fn is_positive(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// Width and height exchanged
    pub fn swapped(&self) -> Size {
        Size::new(self.height, self.width)
    }
}

/// Rotation, scale, reflection and translation in the plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    matrix: Matrix3<f64>,
}

impl AffineTransform {
    /// The neutral transform
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// Translation by `(dx, dy)`
    pub fn translate(dx: f64, dy: f64) -> Self {
        Self {
            matrix: Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0),
        }
    }

    /// Counter-clockwise rotation about the origin (radians)
    pub fn rotate(theta: f64) -> Self {
        let (s, c) = theta.sin_cos();
        Self {
            matrix: Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0),
        }
    }

    /// Quarter turn about the origin, exact in floating point
    pub fn rotate90(clockwise: bool) -> Self {
        let s = if clockwise { -1.0 } else { 1.0 };
        Self {
            matrix: Matrix3::new(0.0, -s, 0.0, s, 0.0, 0.0, 0.0, 0.0, 1.0),
        }
    }

    /// Scale about the origin
    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            matrix: Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0),
        }
    }

    /// Reflection about the vertical line `x = axis_x`
    pub fn mirror_x(axis_x: f64) -> Self {
        Self {
            matrix: Matrix3::new(-1.0, 0.0, 2.0 * axis_x, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0),
        }
    }

    /// Reflection about the horizontal line `y = axis_y`
    pub fn mirror_y(axis_y: f64) -> Self {
        Self {
            matrix: Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 2.0 * axis_y, 0.0, 0.0, 1.0),
        }
    }

    /// Apply `second` after `first`
    pub fn compose(second: &AffineTransform, first: &AffineTransform) -> Self {
        Self {
            matrix: second.matrix * first.matrix,
        }
    }

    /// This transform followed by `next`
    pub fn then(&self, next: &AffineTransform) -> Self {
        Self::compose(next, self)
    }

    /// Transform a point
    pub fn apply(&self, p: Point) -> Point {
        let v = self.matrix * Vector3::new(p.x, p.y, 1.0);
        Point::new(v.x, v.y)
    }

    /// Transform a free vector (translation ignored)
    pub fn apply_vector(&self, v: Point) -> Point {
        let r = self.matrix * Vector3::new(v.x, v.y, 0.0);
        Point::new(r.x, r.y)
    }

    /// Determinant of the linear part
    pub fn determinant(&self) -> f64 {
        self.matrix.m11 * self.matrix.m22 - self.matrix.m12 * self.matrix.m21
    }

    /// True when the transform reverses orientation (odd number of mirrors)
    pub fn is_reflection(&self) -> bool {
        self.determinant() < 0.0
    }

    /// Component-wise comparison against the identity
    pub fn is_identity(&self, tolerance: f64) -> bool {
        (self.matrix - Matrix3::identity()).abs().max() <= tolerance
    }

    /// Underlying homogeneous matrix
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for AffineTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.matrix;
        write!(
            f,
            "[{:.6} {:.6} {:.4}; {:.6} {:.6} {:.4}]",
            m.m11, m.m12, m.m13, m.m21, m.m22, m.m23
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9
    }

    #[test]
    fn test_compose_order() {
        let rotate = AffineTransform::rotate(FRAC_PI_2);
        let shift = AffineTransform::translate(10.0, 0.0);

        // Rotate first, then shift
        let a = AffineTransform::compose(&shift, &rotate);
        assert!(close(a.apply(Point::new(1.0, 0.0)), Point::new(10.0, 1.0)));

        // Shift first, then rotate
        let b = AffineTransform::compose(&rotate, &shift);
        assert!(close(b.apply(Point::new(1.0, 0.0)), Point::new(0.0, 11.0)));

        assert!(close(rotate.then(&shift).apply(Point::new(1.0, 0.0)), Point::new(10.0, 1.0)));
    }

    #[test]
    fn test_rotate90_matches_rotate() {
        let p = Point::new(3.0, -2.0);
        assert!(close(
            AffineTransform::rotate90(false).apply(p),
            AffineTransform::rotate(FRAC_PI_2).apply(p)
        ));
        assert!(close(
            AffineTransform::rotate90(true).apply(p),
            AffineTransform::rotate(-FRAC_PI_2).apply(p)
        ));
        assert_eq!(AffineTransform::rotate90(true).apply(Point::new(1.0, 0.0)), Point::new(0.0, -1.0));
    }

    #[test]
    fn test_mirror_is_reflection() {
        let mx = AffineTransform::mirror_x(20.0);
        assert_eq!(mx.apply(Point::new(5.0, 3.0)), Point::new(35.0, 3.0));
        assert!(mx.is_reflection());

        let both = mx.then(&AffineTransform::mirror_y(15.0));
        assert!(!both.is_reflection());
        assert!(!AffineTransform::rotate(0.3).is_reflection());
    }

    #[test]
    fn test_vector_ignores_translation() {
        let t = AffineTransform::translate(5.0, 5.0).then(&AffineTransform::rotate90(false));
        assert!(close(t.apply_vector(Point::new(1.0, 0.0)), Point::new(0.0, 1.0)));
    }

    #[test]
    fn test_identity() {
        assert!(AffineTransform::identity().is_identity(0.0));
        assert!(!AffineTransform::translate(0.0, 1e-3).is_identity(1e-6));
        let t = AffineTransform::scale(2.0, 3.0);
        assert_eq!(t.apply(Point::new(1.0, 1.0)), Point::new(2.0, 3.0));
        assert_eq!(t.determinant(), 6.0);
    }
}
