#![warn(missing_docs)]

//! Surface adaptors for the surface-surface intersection kernel.
//!
//! The intersection engine only talks to geometry through the [`Surface`]
//! trait (position and derivative queries, parameter bounds, periodicity and
//! a trimmed-region predicate) and through the [`Curve2d`] trait for the
//! boundary arcs of trimmed faces. This crate defines both interfaces plus the
//! analytic surfaces (plane, cylinder, cone, sphere, torus) that callers and
//! tests feed into the engine.

use std::f64::consts::PI;

use ssi_math::{Dir3, Point2, Point3, Vec3};

pub mod trim;

pub use trim::{
    ArcRef, Circle2d, Curve2d, Line2d, LoopOrientation, TrimArc, TrimLoop, TrimmedSurface,
    VertexRef,
};

/// Parameter value used to report an unbounded domain direction.
pub const UNBOUNDED: f64 = 1e10;

// =============================================================================
// Surface interface
// =============================================================================

/// The kind of a surface (used for logging and meshing shortcuts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Infinite plane.
    Plane,
    /// Cylindrical surface (infinite extent along axis).
    Cylinder,
    /// Conical surface.
    Cone,
    /// Spherical surface.
    Sphere,
    /// Toroidal surface.
    Torus,
    /// A base surface restricted by trim loops.
    Trimmed,
    /// Anything else (freeform surfaces supplied by the caller).
    Other,
}

/// Position and partial derivatives up to second order at one parameter pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceDerivatives {
    /// Surface point.
    pub point: Point3,
    /// ∂P/∂u.
    pub du: Vec3,
    /// ∂P/∂v.
    pub dv: Vec3,
    /// ∂²P/∂u².
    pub duu: Vec3,
    /// ∂²P/∂v².
    pub dvv: Vec3,
    /// ∂²P/∂u∂v.
    pub duv: Vec3,
}

impl SurfaceDerivatives {
    /// True when every component is finite.
    pub fn is_finite(&self) -> bool {
        ssi_math::is_finite_point(&self.point)
            && [self.du, self.dv, self.duu, self.dvv, self.duv]
                .iter()
                .all(|v| v.iter().all(|c| c.is_finite()))
    }
}

/// A parametric surface in 3D space, as consumed by the intersection engine.
///
/// Implementations must be read-only: the engine shares a surface by
/// reference across the stages of a query and, when the caller runs several
/// queries concurrently, across threads.
pub trait Surface: Send + Sync + std::fmt::Debug {
    /// Evaluate the surface at parameter `(u, v)` to get a 3D point.
    fn evaluate(&self, uv: Point2) -> Point3;

    /// Partial derivative with respect to u at `(u, v)`.
    fn d_du(&self, uv: Point2) -> Vec3;

    /// Partial derivative with respect to v at `(u, v)`.
    fn d_dv(&self, uv: Point2) -> Vec3;

    /// Position plus first and second derivatives.
    ///
    /// The default derives the second derivatives by central differences of
    /// [`Surface::d_du`] and [`Surface::d_dv`].
    fn derivatives(&self, uv: Point2) -> SurfaceDerivatives {
        let h = 1e-6;
        let du_p = self.d_du(Point2::new(uv.x + h, uv.y));
        let du_m = self.d_du(Point2::new(uv.x - h, uv.y));
        let dv_p = self.d_dv(Point2::new(uv.x, uv.y + h));
        let dv_m = self.d_dv(Point2::new(uv.x, uv.y - h));
        let du_vp = self.d_du(Point2::new(uv.x, uv.y + h));
        let du_vm = self.d_du(Point2::new(uv.x, uv.y - h));
        SurfaceDerivatives {
            point: self.evaluate(uv),
            du: self.d_du(uv),
            dv: self.d_dv(uv),
            duu: (du_p - du_m) / (2.0 * h),
            dvv: (dv_p - dv_m) / (2.0 * h),
            duv: (du_vp - du_vm) / (2.0 * h),
        }
    }

    /// Unit normal at `(u, v)`, or `None` at a singular point (collapsed
    /// parameter line, apex) where the partials are parallel or vanish.
    fn normal(&self, uv: Point2) -> Option<Dir3> {
        let du = self.d_du(uv);
        let dv = self.d_dv(uv);
        let n = du.cross(&dv);
        let scale = du.norm() * dv.norm();
        if scale <= f64::MIN_POSITIVE || n.norm() <= 1e-12 * scale.max(1e-300) {
            return None;
        }
        Some(Dir3::new_normalize(n))
    }

    /// Parameter domain as `((u_min, u_max), (v_min, v_max))`.
    ///
    /// Unbounded directions are reported as `±UNBOUNDED`.
    fn domain(&self) -> ((f64, f64), (f64, f64));

    /// Period in u, if the surface is u-periodic.
    fn u_period(&self) -> Option<f64> {
        None
    }

    /// Period in v, if the surface is v-periodic.
    fn v_period(&self) -> Option<f64> {
        None
    }

    /// Whether `(u, v)` lies inside the trimmed region of the surface.
    fn is_in_trim(&self, _uv: Point2) -> bool {
        true
    }

    /// Trim loops bounding the surface (empty for untrimmed surfaces).
    fn trim_loops(&self) -> &[TrimLoop] {
        &[]
    }

    /// The kind of this surface.
    fn surface_type(&self) -> SurfaceKind;
}

/// Returns true if a domain direction is reported as unbounded.
pub fn is_unbounded(range: (f64, f64)) -> bool {
    range.0 <= -UNBOUNDED || range.1 >= UNBOUNDED
}

fn perpendicular_ref(axis: &Dir3) -> Dir3 {
    let arbitrary = if axis.as_ref().x.abs() < 0.9 {
        Vec3::x()
    } else {
        Vec3::y()
    };
    Dir3::new_normalize(arbitrary - arbitrary.dot(axis.as_ref()) * axis.as_ref())
}

// =============================================================================
// Plane
// =============================================================================

/// An infinite plane defined by an origin point and a coordinate frame.
///
/// Parameterization: `P(u, v) = origin + u * x_dir + v * y_dir`
#[derive(Debug, Clone)]
pub struct Plane {
    /// Origin point on the plane.
    pub origin: Point3,
    /// Unit vector along the u direction.
    pub x_dir: Dir3,
    /// Unit vector along the v direction.
    pub y_dir: Dir3,
    /// Unit normal (x_dir × y_dir).
    pub normal_dir: Dir3,
}

impl Plane {
    /// Create a plane from origin and two direction vectors.
    ///
    /// `y_dir` is orthogonalized against `x_dir`; neither needs to be normalized.
    pub fn new(origin: Point3, x_dir: Vec3, y_dir: Vec3) -> Self {
        let x = Dir3::new_normalize(x_dir);
        let n = Dir3::new_normalize(x_dir.cross(&y_dir));
        let y = Dir3::new_normalize(n.as_ref().cross(x.as_ref()));
        Self {
            origin,
            x_dir: x,
            y_dir: y,
            normal_dir: n,
        }
    }

    /// Create a plane from origin and normal. X/Y directions are chosen arbitrarily.
    pub fn from_normal(origin: Point3, normal: Vec3) -> Self {
        let n = Dir3::new_normalize(normal);
        let arbitrary = if n.as_ref().x.abs() < 0.9 {
            Vec3::x()
        } else {
            Vec3::y()
        };
        let x = Dir3::new_normalize(arbitrary.cross(n.as_ref()));
        let y = Dir3::new_normalize(n.as_ref().cross(x.as_ref()));
        Self {
            origin,
            x_dir: x,
            y_dir: y,
            normal_dir: n,
        }
    }

    /// XY plane at the origin.
    pub fn xy() -> Self {
        Self::new(Point3::origin(), Vec3::x(), Vec3::y())
    }

    /// XZ plane at the origin.
    pub fn xz() -> Self {
        Self::new(Point3::origin(), Vec3::x(), Vec3::z())
    }

    /// Project a 3D point onto this plane's (u, v) parameter space.
    pub fn project(&self, p: &Point3) -> Point2 {
        let d = p - self.origin;
        Point2::new(d.dot(self.x_dir.as_ref()), d.dot(self.y_dir.as_ref()))
    }

    /// Signed distance from a point to this plane.
    pub fn signed_distance(&self, p: &Point3) -> f64 {
        (p - self.origin).dot(self.normal_dir.as_ref())
    }
}

impl Surface for Plane {
    fn evaluate(&self, uv: Point2) -> Point3 {
        self.origin + uv.x * self.x_dir.as_ref() + uv.y * self.y_dir.as_ref()
    }

    fn d_du(&self, _uv: Point2) -> Vec3 {
        *self.x_dir.as_ref()
    }

    fn d_dv(&self, _uv: Point2) -> Vec3 {
        *self.y_dir.as_ref()
    }

    fn derivatives(&self, uv: Point2) -> SurfaceDerivatives {
        SurfaceDerivatives {
            point: self.evaluate(uv),
            du: *self.x_dir.as_ref(),
            dv: *self.y_dir.as_ref(),
            duu: Vec3::zeros(),
            dvv: Vec3::zeros(),
            duv: Vec3::zeros(),
        }
    }

    fn normal(&self, _uv: Point2) -> Option<Dir3> {
        Some(self.normal_dir)
    }

    fn domain(&self) -> ((f64, f64), (f64, f64)) {
        ((-UNBOUNDED, UNBOUNDED), (-UNBOUNDED, UNBOUNDED))
    }

    fn surface_type(&self) -> SurfaceKind {
        SurfaceKind::Plane
    }
}

// =============================================================================
// Cylinder
// =============================================================================

/// A cylindrical surface defined by an axis line and radius.
///
/// Parameterization: `P(u, v) = center + radius * (cos(u) * x_dir + sin(u) * y_dir) + v * axis`
///
/// Where `u ∈ [0, 2π)` is the angular parameter and `v` is the height along the axis.
#[derive(Debug, Clone)]
pub struct CylinderSurface {
    /// Center point at the base of the cylinder axis.
    pub center: Point3,
    /// Unit direction along the cylinder axis.
    pub axis: Dir3,
    /// Reference direction for u=0 (perpendicular to axis).
    pub ref_dir: Dir3,
    /// Radius of the cylinder.
    pub radius: f64,
}

impl CylinderSurface {
    /// Create a cylinder with axis along Z, centered at origin.
    pub fn new(radius: f64) -> Self {
        Self {
            center: Point3::origin(),
            axis: Dir3::new_normalize(Vec3::z()),
            ref_dir: Dir3::new_normalize(Vec3::x()),
            radius,
        }
    }

    /// Create a cylinder with a custom center and axis.
    pub fn with_axis(center: Point3, axis: Vec3, radius: f64) -> Self {
        let a = Dir3::new_normalize(axis);
        Self {
            center,
            ref_dir: perpendicular_ref(&a),
            axis: a,
            radius,
        }
    }

    fn radial(&self, u: f64) -> (Vec3, Vec3) {
        let (sin_u, cos_u) = u.sin_cos();
        let y_dir = self.axis.as_ref().cross(self.ref_dir.as_ref());
        (
            cos_u * self.ref_dir.as_ref() + sin_u * y_dir,
            -sin_u * self.ref_dir.as_ref() + cos_u * y_dir,
        )
    }
}

impl Surface for CylinderSurface {
    fn evaluate(&self, uv: Point2) -> Point3 {
        let (e, _) = self.radial(uv.x);
        self.center + self.radius * e + uv.y * self.axis.as_ref()
    }

    fn d_du(&self, uv: Point2) -> Vec3 {
        let (_, de) = self.radial(uv.x);
        self.radius * de
    }

    fn d_dv(&self, _uv: Point2) -> Vec3 {
        *self.axis.as_ref()
    }

    fn derivatives(&self, uv: Point2) -> SurfaceDerivatives {
        let (e, de) = self.radial(uv.x);
        SurfaceDerivatives {
            point: self.center + self.radius * e + uv.y * self.axis.as_ref(),
            du: self.radius * de,
            dv: *self.axis.as_ref(),
            duu: -self.radius * e,
            dvv: Vec3::zeros(),
            duv: Vec3::zeros(),
        }
    }

    fn normal(&self, uv: Point2) -> Option<Dir3> {
        let (e, _) = self.radial(uv.x);
        Some(Dir3::new_normalize(e))
    }

    fn domain(&self) -> ((f64, f64), (f64, f64)) {
        ((0.0, 2.0 * PI), (-UNBOUNDED, UNBOUNDED))
    }

    fn u_period(&self) -> Option<f64> {
        Some(2.0 * PI)
    }

    fn surface_type(&self) -> SurfaceKind {
        SurfaceKind::Cylinder
    }
}

// =============================================================================
// Cone
// =============================================================================

/// A conical surface defined by an apex, axis, and half-angle.
///
/// Parameterization: `P(u, v) = apex + v * (cos(half_angle) * axis + sin(half_angle) * (cos(u) * x + sin(u) * y))`
///
/// Where `u ∈ [0, 2π)` is the angular parameter and `v ≥ 0` is the distance from apex along the cone.
/// The apex (`v = 0`) is a singular point.
#[derive(Debug, Clone)]
pub struct ConeSurface {
    /// Apex (tip) of the cone.
    pub apex: Point3,
    /// Unit direction along the cone axis (from apex toward base).
    pub axis: Dir3,
    /// Reference direction for u=0 (perpendicular to axis).
    pub ref_dir: Dir3,
    /// Half-angle of the cone in radians.
    pub half_angle: f64,
}

impl ConeSurface {
    /// Create a cone with apex at origin, axis along Z, with the given half-angle.
    pub fn new(half_angle: f64) -> Self {
        Self {
            apex: Point3::origin(),
            axis: Dir3::new_normalize(Vec3::z()),
            ref_dir: Dir3::new_normalize(Vec3::x()),
            half_angle,
        }
    }

    fn radial(&self, u: f64) -> (Vec3, Vec3) {
        let (sin_u, cos_u) = u.sin_cos();
        let y_dir = self.axis.as_ref().cross(self.ref_dir.as_ref());
        (
            cos_u * self.ref_dir.as_ref() + sin_u * y_dir,
            -sin_u * self.ref_dir.as_ref() + cos_u * y_dir,
        )
    }
}

impl Surface for ConeSurface {
    fn evaluate(&self, uv: Point2) -> Point3 {
        let (e, _) = self.radial(uv.x);
        let (sa, ca) = self.half_angle.sin_cos();
        self.apex + uv.y * (ca * self.axis.as_ref() + sa * e)
    }

    fn d_du(&self, uv: Point2) -> Vec3 {
        let (_, de) = self.radial(uv.x);
        uv.y * self.half_angle.sin() * de
    }

    fn d_dv(&self, uv: Point2) -> Vec3 {
        let (e, _) = self.radial(uv.x);
        let (sa, ca) = self.half_angle.sin_cos();
        ca * self.axis.as_ref() + sa * e
    }

    fn derivatives(&self, uv: Point2) -> SurfaceDerivatives {
        let (e, de) = self.radial(uv.x);
        let (sa, ca) = self.half_angle.sin_cos();
        SurfaceDerivatives {
            point: self.apex + uv.y * (ca * self.axis.as_ref() + sa * e),
            du: uv.y * sa * de,
            dv: ca * self.axis.as_ref() + sa * e,
            duu: -uv.y * sa * e,
            dvv: Vec3::zeros(),
            duv: sa * de,
        }
    }

    fn normal(&self, uv: Point2) -> Option<Dir3> {
        if uv.y.abs() < 1e-12 {
            return None;
        }
        let (e, _) = self.radial(uv.x);
        let (sa, ca) = self.half_angle.sin_cos();
        let n = ca * e - sa * self.axis.as_ref();
        Some(Dir3::new_normalize(if uv.y < 0.0 { -n } else { n }))
    }

    fn domain(&self) -> ((f64, f64), (f64, f64)) {
        ((0.0, 2.0 * PI), (0.0, UNBOUNDED))
    }

    fn u_period(&self) -> Option<f64> {
        Some(2.0 * PI)
    }

    fn surface_type(&self) -> SurfaceKind {
        SurfaceKind::Cone
    }
}

// =============================================================================
// Sphere
// =============================================================================

/// A spherical surface defined by center and radius.
///
/// Parameterization: `P(u, v) = center + radius * (cos(v) * (cos(u) * x + sin(u) * y) + sin(v) * z)`
///
/// Where `u ∈ [0, 2π)` is longitude and `v ∈ [-π/2, π/2]` is latitude.
#[derive(Debug, Clone)]
pub struct SphereSurface {
    /// Center of the sphere.
    pub center: Point3,
    /// Radius of the sphere.
    pub radius: f64,
    /// Reference direction for u=0 (perpendicular to axis).
    pub ref_dir: Dir3,
    /// Axis direction (north pole).
    pub axis: Dir3,
}

impl SphereSurface {
    /// Create a sphere centered at origin with the given radius.
    pub fn new(radius: f64) -> Self {
        Self::with_center(Point3::origin(), radius)
    }

    /// Create a sphere with a custom center.
    pub fn with_center(center: Point3, radius: f64) -> Self {
        Self {
            center,
            radius,
            ref_dir: Dir3::new_normalize(Vec3::x()),
            axis: Dir3::new_normalize(Vec3::z()),
        }
    }

    fn frame(&self, u: f64) -> (Vec3, Vec3) {
        let (sin_u, cos_u) = u.sin_cos();
        let y_dir = self.axis.as_ref().cross(self.ref_dir.as_ref());
        (
            cos_u * self.ref_dir.as_ref() + sin_u * y_dir,
            -sin_u * self.ref_dir.as_ref() + cos_u * y_dir,
        )
    }
}

impl Surface for SphereSurface {
    fn evaluate(&self, uv: Point2) -> Point3 {
        let (e, _) = self.frame(uv.x);
        let (sin_v, cos_v) = uv.y.sin_cos();
        self.center + self.radius * (cos_v * e + sin_v * self.axis.as_ref())
    }

    fn d_du(&self, uv: Point2) -> Vec3 {
        let (_, de) = self.frame(uv.x);
        self.radius * uv.y.cos() * de
    }

    fn d_dv(&self, uv: Point2) -> Vec3 {
        let (e, _) = self.frame(uv.x);
        let (sin_v, cos_v) = uv.y.sin_cos();
        self.radius * (-sin_v * e + cos_v * self.axis.as_ref())
    }

    fn derivatives(&self, uv: Point2) -> SurfaceDerivatives {
        let (e, de) = self.frame(uv.x);
        let (sin_v, cos_v) = uv.y.sin_cos();
        let r = self.radius;
        let radial = cos_v * e + sin_v * self.axis.as_ref();
        SurfaceDerivatives {
            point: self.center + r * radial,
            du: r * cos_v * de,
            dv: r * (-sin_v * e + cos_v * self.axis.as_ref()),
            duu: -r * cos_v * e,
            dvv: -r * radial,
            duv: -r * sin_v * de,
        }
    }

    fn normal(&self, uv: Point2) -> Option<Dir3> {
        let (e, _) = self.frame(uv.x);
        let (sin_v, cos_v) = uv.y.sin_cos();
        Some(Dir3::new_normalize(cos_v * e + sin_v * self.axis.as_ref()))
    }

    fn domain(&self) -> ((f64, f64), (f64, f64)) {
        ((0.0, 2.0 * PI), (-PI / 2.0, PI / 2.0))
    }

    fn u_period(&self) -> Option<f64> {
        Some(2.0 * PI)
    }

    fn surface_type(&self) -> SurfaceKind {
        SurfaceKind::Sphere
    }
}

// =============================================================================
// Torus
// =============================================================================

/// A toroidal surface defined by center, axis, and two radii.
///
/// Parameterization:
/// ```text
/// P(u, v) = center + (R + r·cos(v))·(cos(u)·ref_dir + sin(u)·y_dir) + r·sin(v)·axis
/// ```
///
/// Both `u` and `v` are periodic with period `2π`.
#[derive(Debug, Clone)]
pub struct TorusSurface {
    /// Center of the torus.
    pub center: Point3,
    /// Unit direction of the torus axis (perpendicular to the plane of the ring).
    pub axis: Dir3,
    /// Reference direction for u=0 (perpendicular to axis).
    pub ref_dir: Dir3,
    /// Major radius: distance from center to tube center.
    pub major_radius: f64,
    /// Minor radius: radius of the tube.
    pub minor_radius: f64,
}

impl TorusSurface {
    /// Create a torus centered at origin with axis along Z.
    pub fn new(major_radius: f64, minor_radius: f64) -> Self {
        Self::with_axis(Point3::origin(), Vec3::z(), major_radius, minor_radius)
    }

    /// Create a torus with a custom center and axis.
    pub fn with_axis(center: Point3, axis: Vec3, major_radius: f64, minor_radius: f64) -> Self {
        let a = Dir3::new_normalize(axis);
        Self {
            center,
            ref_dir: if (axis - Vec3::z()).norm() < 1e-12 {
                Dir3::new_normalize(Vec3::x())
            } else {
                perpendicular_ref(&a)
            },
            axis: a,
            major_radius,
            minor_radius,
        }
    }

    fn frame(&self, u: f64) -> (Vec3, Vec3) {
        let (sin_u, cos_u) = u.sin_cos();
        let y_dir = self.axis.as_ref().cross(self.ref_dir.as_ref());
        (
            cos_u * self.ref_dir.as_ref() + sin_u * y_dir,
            -sin_u * self.ref_dir.as_ref() + cos_u * y_dir,
        )
    }
}

impl Surface for TorusSurface {
    fn evaluate(&self, uv: Point2) -> Point3 {
        let (e, _) = self.frame(uv.x);
        let (sin_v, cos_v) = uv.y.sin_cos();
        self.center
            + (self.major_radius + self.minor_radius * cos_v) * e
            + self.minor_radius * sin_v * self.axis.as_ref()
    }

    fn d_du(&self, uv: Point2) -> Vec3 {
        let (_, de) = self.frame(uv.x);
        (self.major_radius + self.minor_radius * uv.y.cos()) * de
    }

    fn d_dv(&self, uv: Point2) -> Vec3 {
        let (e, _) = self.frame(uv.x);
        let (sin_v, cos_v) = uv.y.sin_cos();
        -self.minor_radius * sin_v * e + self.minor_radius * cos_v * self.axis.as_ref()
    }

    fn derivatives(&self, uv: Point2) -> SurfaceDerivatives {
        let (e, de) = self.frame(uv.x);
        let (sin_v, cos_v) = uv.y.sin_cos();
        let (big_r, r) = (self.major_radius, self.minor_radius);
        let a = self.axis.as_ref();
        SurfaceDerivatives {
            point: self.center + (big_r + r * cos_v) * e + r * sin_v * a,
            du: (big_r + r * cos_v) * de,
            dv: -r * sin_v * e + r * cos_v * a,
            duu: -(big_r + r * cos_v) * e,
            dvv: -r * cos_v * e - r * sin_v * a,
            duv: -r * sin_v * de,
        }
    }

    fn normal(&self, uv: Point2) -> Option<Dir3> {
        let (e, _) = self.frame(uv.x);
        let (sin_v, cos_v) = uv.y.sin_cos();
        Some(Dir3::new_normalize(cos_v * e + sin_v * self.axis.as_ref()))
    }

    fn domain(&self) -> ((f64, f64), (f64, f64)) {
        ((0.0, 2.0 * PI), (0.0, 2.0 * PI))
    }

    fn u_period(&self) -> Option<f64> {
        Some(2.0 * PI)
    }

    fn v_period(&self) -> Option<f64> {
        Some(2.0 * PI)
    }

    fn surface_type(&self) -> SurfaceKind {
        SurfaceKind::Torus
    }
}
