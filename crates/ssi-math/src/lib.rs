#![warn(missing_docs)]

//! Math types for the surface-surface intersection kernel.
//!
//! Thin wrappers around nalgebra providing the point, vector and direction
//! types shared by the geometry and intersection crates, plus tolerance
//! constants and helpers for periodic parameters.

use nalgebra::{Unit, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// A point in 3D space.
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f64>;

/// A unit (normalized) direction vector in 3D space.
pub type Dir3 = Unit<Vector3<f64>>;

/// A point in 2D parameter space.
pub type Point2 = nalgebra::Point2<f64>;

/// A vector in 2D space.
pub type Vec2 = Vector2<f64>;

/// Tolerance constants for geometric comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Linear distance tolerance in model units.
    pub linear: f64,
    /// Angular tolerance in radians.
    pub angular: f64,
    /// Parametric confusion, in parameter units.
    pub parametric: f64,
}

impl Tolerance {
    /// Default CAD tolerances (1e-7 linear, 1e-12 rad angular, 1e-9 parametric).
    pub const DEFAULT: Self = Self {
        linear: 1e-7,
        angular: 1e-12,
        parametric: 1e-9,
    };

    /// Create tolerances with the given linear value and default angular/parametric values.
    pub fn with_linear(linear: f64) -> Self {
        Self {
            linear,
            ..Self::DEFAULT
        }
    }

    /// Check if two points are coincident within tolerance.
    pub fn points_equal(&self, a: &Point3, b: &Point3) -> bool {
        (a - b).norm_squared() <= self.linear * self.linear
    }

    /// Check if two parameter pairs coincide within the parametric confusion.
    pub fn params_equal(&self, a: &Point2, b: &Point2) -> bool {
        (a.x - b.x).abs() <= self.parametric && (a.y - b.y).abs() <= self.parametric
    }

    /// Check if a scalar distance is effectively zero.
    pub fn is_zero(&self, d: f64) -> bool {
        d.abs() < self.linear
    }

    /// Check if two angles are effectively equal (in radians).
    pub fn angles_equal(&self, a: f64, b: f64) -> bool {
        (a - b).abs() < self.angular
    }

    /// Squared linear tolerance.
    pub fn square_linear(&self) -> f64 {
        self.linear * self.linear
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Shift `value` by whole periods so that it lies in the same period as `reference`.
///
/// A shift is applied while the two values are more than 0.8 period apart.
/// A `None` or non-positive period leaves the value unchanged.
pub fn adjust_to_period(value: f64, reference: f64, period: Option<f64>) -> f64 {
    let Some(period) = period.filter(|p| *p > 0.0 && p.is_finite()) else {
        return value;
    };
    let mut v = value;
    while reference - v > 0.8 * period {
        v += period;
    }
    while v - reference > 0.8 * period {
        v -= period;
    }
    v
}

/// Periods of the two parameters of one surface (`None` when not periodic).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodPair {
    /// Period in u.
    pub u: Option<f64>,
    /// Period in v.
    pub v: Option<f64>,
}

impl PeriodPair {
    /// Create from the two optional periods.
    pub fn new(u: Option<f64>, v: Option<f64>) -> Self {
        Self { u, v }
    }

    /// True when neither parameter is periodic.
    pub fn is_none(&self) -> bool {
        self.u.is_none() && self.v.is_none()
    }

    /// Shift `uv` to the same period as `reference`, coordinate by coordinate.
    pub fn adjust(&self, uv: Point2, reference: Point2) -> Point2 {
        Point2::new(
            adjust_to_period(uv.x, reference.x, self.u),
            adjust_to_period(uv.y, reference.y, self.v),
        )
    }

    /// Parameter distance with each periodic coordinate taken modulo its period.
    pub fn distance(&self, a: Point2, b: Point2) -> f64 {
        (self.adjust(a, b) - b).norm()
    }
}

/// Shift `value` by whole periods into the half-open interval `[start, start + period)`.
pub fn wrap_into(value: f64, start: f64, period: f64) -> f64 {
    if period <= 0.0 || !period.is_finite() {
        return value;
    }
    let k = ((value - start) / period).floor();
    let wrapped = value - k * period;
    // Guard the upper end against rounding.
    if wrapped >= start + period {
        wrapped - period
    } else {
        wrapped
    }
}

/// Solve the 2x2 linear system `[a11 a12; a21 a22] * x = b`.
///
/// Returns `None` when the determinant is below `1e-14` relative to the squared matrix scale.
pub fn solve_2x2(a11: f64, a12: f64, a21: f64, a22: f64, b1: f64, b2: f64) -> Option<(f64, f64)> {
    let det = a11 * a22 - a12 * a21;
    let scale = a11.abs().max(a12.abs()).max(a21.abs()).max(a22.abs());
    if scale == 0.0 || det.abs() <= 1e-14 * scale * scale {
        return None;
    }
    Some(((a22 * b1 - a12 * b2) / det, (a11 * b2 - a21 * b1) / det))
}

/// A point is finite when none of its coordinates are NaN or infinite.
pub fn is_finite_point(p: &Point3) -> bool {
    p.x.is_finite() && p.y.is_finite() && p.z.is_finite()
}

/// Signed area of the 2D parallelogram spanned by `a` and `b` (`a × b`).
pub fn cross_2d(a: &Vec2, b: &Vec2) -> f64 {
    a.x * b.y - a.y * b.x
}
