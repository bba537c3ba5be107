//! Two-point deskew solver
//!
//! Recovers the rigid motion (rotation plus translation) that carries two
//! nominal reference points onto their measured positions. Closed form,
//! exact for rigid motions; no fitting over more points.

use super::transform::{AffineTransform, Point};
use pcbmill_core::GeometryError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Points closer than this are treated as coincident (mm)
pub const DEGENERATE_EPSILON: f64 = 1e-9;

/// Measured placement error of the stock
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeskewResult {
    /// Signed rotation, radians, counter-clockwise positive
    pub rotation: f64,
    /// Translation applied after the rotation about the origin
    pub offset: Point,
}

impl DeskewResult {
    /// The correction as one transform: rotate, then translate
    pub fn transform(&self) -> AffineTransform {
        AffineTransform::rotate(self.rotation)
            .then(&AffineTransform::translate(self.offset.x, self.offset.y))
    }

    /// Rotation in degrees
    pub fn rotation_degrees(&self) -> f64 {
        self.rotation.to_degrees()
    }
}

/// Solve for the rigid motion taking `(a0, b0)` onto `(a1, b1)`
///
/// Builds the right triangle `a0, b0, t0` with `t0 = (a0.x, b0.y)`,
/// measures the hypotenuse direction before and after, and walks the
/// horizontal leg from `b1` to find the moved corner `t1`. The offset is
/// reported relative to the origin so that `rotate` then `translate`
/// reproduces the motion.
pub fn deskew(a0: Point, b0: Point, a1: Point, b1: Point) -> Result<DeskewResult, GeometryError> {
    let h0 = a0.sub(b0);
    let h1 = a1.sub(b1);

    if h0.length() <= DEGENERATE_EPSILON {
        return Err(GeometryError::DegenerateInput {
            reason: format!("nominal points {} and {} coincide", a0, b0),
        });
    }
    if h1.length() <= DEGENERATE_EPSILON {
        return Err(GeometryError::DegenerateInput {
            reason: format!("measured points {} and {} coincide", a1, b1),
        });
    }
    for p in [a0, b0, a1, b1] {
        if !(p.x.is_finite() && p.y.is_finite()) {
            return Err(GeometryError::DegenerateInput {
                reason: format!("non-finite point {}", p),
            });
        }
    }

    let stretch = h1.length() / h0.length();
    if (stretch - 1.0).abs() > 0.05 {
        warn!(
            "Reference spacing changed by {:.1}%, deskew assumes a rigid motion",
            (stretch - 1.0) * 100.0
        );
    }

    let theta0 = h0.angle();
    let theta1 = h1.angle();
    let rotation = normalize_angle(theta1 - theta0);

    // Corner of the right triangle in the nominal frame
    let t0 = Point::new(a0.x, b0.y);
    let leg = t0.sub(b0);
    let leg_length = leg.length();

    // Walk the same leg from the measured b1, turned by the hypotenuse change
    let direction = leg.angle() + rotation;
    let t1 = Point::new(
        b1.x + leg_length * direction.cos(),
        b1.y + leg_length * direction.sin(),
    );

    // t1 = R * t0 + offset
    let offset = t1.sub(AffineTransform::rotate(rotation).apply(t0));

    debug!(
        "Deskew: rotation {:.4} deg, corner {} -> {}, offset {}",
        rotation.to_degrees(),
        t0,
        t1,
        offset
    );

    Ok(DeskewResult { rotation, offset })
}

/// Wrap an angle into `(-pi, pi]`
pub fn normalize_angle(theta: f64) -> f64 {
    theta.sin().atan2(theta.cos())
}
