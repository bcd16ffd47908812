//! Boundary arcs, trim loops and trimmed surfaces.
//!
//! A trimmed face is a base [`Surface`] restricted by closed loops of 2D
//! arcs in its parameter space. Outer loops bound material, inner loops cut
//! holes. Arcs of both kinds are listed counter-clockwise; the loop
//! orientation tells which side of an arc the material lies on.

use std::f64::consts::PI;

use ssi_math::{cross_2d, wrap_into, Dir3, Point2, Point3, Vec2, Vec3};

use crate::{Surface, SurfaceDerivatives, SurfaceKind};

/// Number of polyline segments used to sample a curved arc.
const CURVED_ARC_SAMPLES: usize = 48;

// =============================================================================
// 2D curves
// =============================================================================

/// A 2D parametric curve (for trim curves in surface parameter space).
pub trait Curve2d: Send + Sync + std::fmt::Debug {
    /// Evaluate the curve at parameter `t` to get a 2D point.
    fn evaluate(&self, t: f64) -> Point2;

    /// Tangent vector at parameter `t`.
    fn tangent(&self, t: f64) -> Vec2;

    /// Natural parameter domain `(t_min, t_max)`.
    fn domain(&self) -> (f64, f64);

    /// True if the curve is a straight line (sampled with a single segment).
    fn is_linear(&self) -> bool {
        false
    }
}

/// A 2D line in parameter space.
#[derive(Debug, Clone)]
pub struct Line2d {
    /// Point at `t = 0`.
    pub origin: Point2,
    /// Direction (not normalized; `t = 1` reaches `origin + direction`).
    pub direction: Vec2,
}

impl Line2d {
    /// Create from two endpoints.
    pub fn from_points(start: Point2, end: Point2) -> Self {
        Self {
            origin: start,
            direction: end - start,
        }
    }
}

impl Curve2d for Line2d {
    fn evaluate(&self, t: f64) -> Point2 {
        self.origin + t * self.direction
    }

    fn tangent(&self, _t: f64) -> Vec2 {
        self.direction
    }

    fn domain(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    fn is_linear(&self) -> bool {
        true
    }
}

/// A 2D circle in parameter space, parameterized by angle.
#[derive(Debug, Clone)]
pub struct Circle2d {
    /// Center of the circle.
    pub center: Point2,
    /// Radius.
    pub radius: f64,
}

impl Circle2d {
    /// Create a circle at the given center with the given radius.
    pub fn new(center: Point2, radius: f64) -> Self {
        Self { center, radius }
    }
}

impl Curve2d for Circle2d {
    fn evaluate(&self, t: f64) -> Point2 {
        let (sin_t, cos_t) = t.sin_cos();
        self.center + self.radius * Vec2::new(cos_t, sin_t)
    }

    fn tangent(&self, t: f64) -> Vec2 {
        let (sin_t, cos_t) = t.sin_cos();
        self.radius * Vec2::new(-sin_t, cos_t)
    }

    fn domain(&self) -> (f64, f64) {
        (0.0, 2.0 * PI)
    }
}

// =============================================================================
// References
// =============================================================================

/// Caller-assigned identifier of a topological vertex at an arc endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexRef(pub u64);

/// Index of a boundary arc within a surface's trim loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArcRef {
    /// Index of the loop in [`Surface::trim_loops`].
    pub loop_index: usize,
    /// Index of the arc within that loop.
    pub arc_index: usize,
}

// =============================================================================
// Arcs and loops
// =============================================================================

/// A boundary arc: a 2D curve restricted to `[first, last]`.
#[derive(Debug)]
pub struct TrimArc {
    /// Underlying 2D curve.
    pub curve: Box<dyn Curve2d>,
    /// Parameter of the arc start.
    pub first: f64,
    /// Parameter of the arc end.
    pub last: f64,
    /// Vertex at the arc start, if any.
    pub start_vertex: Option<VertexRef>,
    /// Vertex at the arc end, if any.
    pub end_vertex: Option<VertexRef>,
}

/// Where a parameter-space segment crosses a boundary arc.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcCrossing {
    /// Arc index within its loop.
    pub arc_index: usize,
    /// Parameter on the arc.
    pub arc_param: f64,
    /// Fraction along the segment, in `[0, 1]`.
    pub segment_param: f64,
    /// Crossing point in parameter space.
    pub uv: Point2,
}

impl TrimArc {
    /// Create an arc over the curve's natural domain.
    pub fn new(curve: Box<dyn Curve2d>) -> Self {
        let (first, last) = curve.domain();
        Self::with_range(curve, first, last)
    }

    /// Create an arc over `[first, last]`.
    pub fn with_range(curve: Box<dyn Curve2d>, first: f64, last: f64) -> Self {
        Self {
            curve,
            first,
            last,
            start_vertex: None,
            end_vertex: None,
        }
    }

    /// Attach endpoint vertices.
    pub fn with_vertices(mut self, start: Option<VertexRef>, end: Option<VertexRef>) -> Self {
        self.start_vertex = start;
        self.end_vertex = end;
        self
    }

    /// Point at arc parameter `t`.
    pub fn value(&self, t: f64) -> Point2 {
        self.curve.evaluate(t)
    }

    /// Tangent at arc parameter `t`, in the direction of increasing parameter.
    pub fn direction(&self, t: f64) -> Vec2 {
        self.curve.tangent(t)
    }

    /// Vertex located at arc parameter `t`, if `t` is an endpoint within `tol`.
    pub fn vertex_at(&self, t: f64, tol: f64) -> Option<VertexRef> {
        if (t - self.first).abs() <= tol {
            self.start_vertex
        } else if (t - self.last).abs() <= tol {
            self.end_vertex
        } else {
            None
        }
    }

    /// Sample the arc as `(param, point)` pairs, endpoints included.
    pub fn sample(&self) -> Vec<(f64, Point2)> {
        let n = if self.curve.is_linear() {
            1
        } else {
            CURVED_ARC_SAMPLES
        };
        (0..=n)
            .map(|i| {
                let t = self.first + (self.last - self.first) * i as f64 / n as f64;
                (t, self.value(t))
            })
            .collect()
    }

    /// Crossings of the segment `a → b` with this arc.
    ///
    /// The polyline crossing is refined on the exact curve by a secant
    /// iteration on the signed distance to the segment's supporting line.
    pub fn crossings(&self, arc_index: usize, a: Point2, b: Point2) -> Vec<ArcCrossing> {
        let d = b - a;
        let len2 = d.norm_squared();
        if len2 <= 0.0 {
            return Vec::new();
        }
        let side = |p: Point2| cross_2d(&d, &(p - a));
        let samples = self.sample();
        let mut out = Vec::new();
        for w in samples.windows(2) {
            let (t0, p0) = w[0];
            let (t1, p1) = w[1];
            let e = p1 - p0;
            let denom = cross_2d(&d, &e);
            if denom.abs() <= 1e-300 {
                continue;
            }
            // a + s d = p0 + r e
            let ap = p0 - a;
            let s = cross_2d(&ap, &e) / denom;
            let r = cross_2d(&ap, &d) / denom;
            let last_window = (t1 - self.last).abs() <= f64::EPSILON * self.last.abs().max(1.0);
            let r_ok = (0.0..1.0).contains(&r) || (last_window && (r - 1.0).abs() <= 1e-12);
            if !(-1e-12..=1.0 + 1e-12).contains(&s) || !r_ok {
                continue;
            }
            let mut t = t0 + r * (t1 - t0);
            if !self.curve.is_linear() {
                let (mut ta, mut tb) = (t0, t1);
                let (mut fa, mut fb) = (side(self.value(ta)), side(self.value(tb)));
                for _ in 0..40 {
                    if (fb - fa).abs() <= 1e-300 {
                        break;
                    }
                    let tm = tb - fb * (tb - ta) / (fb - fa);
                    let tm = tm.clamp(t0.min(t1), t0.max(t1));
                    let fm = side(self.value(tm));
                    t = tm;
                    if fm.abs() <= 1e-14 * len2 {
                        break;
                    }
                    if (fm < 0.0) == (fa < 0.0) {
                        ta = tm;
                        fa = fm;
                    } else {
                        tb = tm;
                        fb = fm;
                    }
                }
            }
            let uv = self.value(t);
            let seg = ((uv - a).dot(&d) / len2).clamp(0.0, 1.0);
            out.push(ArcCrossing {
                arc_index,
                arc_param: t,
                segment_param: seg,
                uv,
            });
        }
        out
    }
}

/// Role of a trim loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOrientation {
    /// Material lies to the left of the arcs.
    Outer,
    /// Hole: material lies to the right of the arcs.
    Inner,
}

impl LoopOrientation {
    /// True when material lies to the left of the arc direction.
    pub fn material_on_left(self) -> bool {
        matches!(self, LoopOrientation::Outer)
    }
}

/// A closed loop of boundary arcs.
#[derive(Debug)]
pub struct TrimLoop {
    /// Arcs in traversal order.
    pub arcs: Vec<TrimArc>,
    /// Outer boundary or hole.
    pub orientation: LoopOrientation,
}

impl TrimLoop {
    /// Create a loop from its arcs.
    pub fn new(arcs: Vec<TrimArc>, orientation: LoopOrientation) -> Self {
        Self { arcs, orientation }
    }

    /// Axis-aligned rectangle `[u0, u1] × [v0, v1]` as four counter-clockwise
    /// line arcs. Corner vertices are numbered `first_vertex..first_vertex + 4`.
    pub fn rectangle(
        u0: f64,
        u1: f64,
        v0: f64,
        v1: f64,
        orientation: LoopOrientation,
        first_vertex: u64,
    ) -> Self {
        let corners = [
            Point2::new(u0, v0),
            Point2::new(u1, v0),
            Point2::new(u1, v1),
            Point2::new(u0, v1),
        ];
        let arcs = (0..4)
            .map(|i| {
                let j = (i + 1) % 4;
                TrimArc::new(Box::new(Line2d::from_points(corners[i], corners[j]))).with_vertices(
                    Some(VertexRef(first_vertex + i as u64)),
                    Some(VertexRef(first_vertex + j as u64)),
                )
            })
            .collect();
        Self::new(arcs, orientation)
    }

    /// Full circle as a single counter-clockwise arc without vertices.
    pub fn circle(center: Point2, radius: f64, orientation: LoopOrientation) -> Self {
        Self::new(
            vec![TrimArc::new(Box::new(Circle2d::new(center, radius)))],
            orientation,
        )
    }

    /// Closed polyline approximating the loop.
    pub fn polygon(&self) -> Vec<Point2> {
        let mut pts = Vec::new();
        for arc in &self.arcs {
            let samples = arc.sample();
            // Drop the last sample; the next arc starts there.
            pts.extend(samples[..samples.len() - 1].iter().map(|(_, p)| *p));
        }
        pts
    }

    /// Crossings of the segment `a → b` with every arc of the loop.
    pub fn crossings(&self, a: Point2, b: Point2) -> Vec<ArcCrossing> {
        self.arcs
            .iter()
            .enumerate()
            .flat_map(|(i, arc)| arc.crossings(i, a, b))
            .collect()
    }
}

/// Point-in-polygon test using the winding number algorithm.
///
/// Works correctly for both convex and concave polygons.
pub fn point_in_polygon(point: &Point2, polygon: &[Point2]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut winding = 0i32;
    let n = polygon.len();

    for i in 0..n {
        let p1 = polygon[i];
        let p2 = polygon[(i + 1) % n];

        if p1.y <= point.y {
            if p2.y > point.y && is_left(&p1, &p2, point) > 0.0 {
                winding += 1;
            }
        } else if p2.y <= point.y && is_left(&p1, &p2, point) < 0.0 {
            winding -= 1;
        }
    }

    winding != 0
}

/// Positive if p2 is to the left of the line p0->p1.
#[inline]
fn is_left(p0: &Point2, p1: &Point2, p2: &Point2) -> f64 {
    (p1.x - p0.x) * (p2.y - p0.y) - (p2.x - p0.x) * (p1.y - p0.y)
}

// =============================================================================
// Trimmed surface
// =============================================================================

/// A base surface restricted to the region bounded by trim loops.
///
/// A parameter pair is inside when it lies inside at least one outer loop
/// and outside every inner loop. Without outer loops the whole base domain
/// counts as material.
#[derive(Debug)]
pub struct TrimmedSurface<'a> {
    base: &'a dyn Surface,
    loops: Vec<TrimLoop>,
    polygons: Vec<Vec<Point2>>,
    domain: ((f64, f64), (f64, f64)),
}

impl<'a> TrimmedSurface<'a> {
    /// Restrict `base` by `loops`.
    pub fn new(base: &'a dyn Surface, loops: Vec<TrimLoop>) -> Self {
        let polygons: Vec<Vec<Point2>> = loops.iter().map(TrimLoop::polygon).collect();
        let ((bu0, bu1), (bv0, bv1)) = base.domain();
        let mut domain = ((bu0, bu1), (bv0, bv1));
        let outer: Vec<&Vec<Point2>> = loops
            .iter()
            .zip(&polygons)
            .filter(|(l, _)| l.orientation == LoopOrientation::Outer)
            .map(|(_, p)| p)
            .collect();
        if !outer.is_empty() {
            let (mut u0, mut u1, mut v0, mut v1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
            for p in outer.iter().flat_map(|poly| poly.iter()) {
                u0 = u0.min(p.x);
                u1 = u1.max(p.x);
                v0 = v0.min(p.y);
                v1 = v1.max(p.y);
            }
            // Periodic directions keep the base range so wrapped loops stay reachable.
            if base.u_period().is_none() {
                domain.0 = (u0.max(bu0), u1.min(bu1));
            }
            if base.v_period().is_none() {
                domain.1 = (v0.max(bv0), v1.min(bv1));
            }
        }
        Self {
            base,
            loops,
            polygons,
            domain,
        }
    }

    /// The untrimmed base surface.
    pub fn base(&self) -> &dyn Surface {
        self.base
    }

    fn normalize(&self, uv: Point2) -> Point2 {
        let ((u0, _), (v0, _)) = self.base.domain();
        let u = match self.base.u_period() {
            Some(p) => wrap_into(uv.x, u0, p),
            None => uv.x,
        };
        let v = match self.base.v_period() {
            Some(p) => wrap_into(uv.y, v0, p),
            None => uv.y,
        };
        Point2::new(u, v)
    }
}

impl Surface for TrimmedSurface<'_> {
    fn evaluate(&self, uv: Point2) -> Point3 {
        self.base.evaluate(uv)
    }

    fn d_du(&self, uv: Point2) -> Vec3 {
        self.base.d_du(uv)
    }

    fn d_dv(&self, uv: Point2) -> Vec3 {
        self.base.d_dv(uv)
    }

    fn derivatives(&self, uv: Point2) -> SurfaceDerivatives {
        self.base.derivatives(uv)
    }

    fn normal(&self, uv: Point2) -> Option<Dir3> {
        self.base.normal(uv)
    }

    fn domain(&self) -> ((f64, f64), (f64, f64)) {
        self.domain
    }

    fn u_period(&self) -> Option<f64> {
        self.base.u_period()
    }

    fn v_period(&self) -> Option<f64> {
        self.base.v_period()
    }

    fn is_in_trim(&self, uv: Point2) -> bool {
        if !self.base.is_in_trim(uv) {
            return false;
        }
        let uv = self.normalize(uv);
        let mut has_outer = false;
        let mut in_outer = false;
        for (lp, poly) in self.loops.iter().zip(&self.polygons) {
            match lp.orientation {
                LoopOrientation::Outer => {
                    has_outer = true;
                    in_outer |= point_in_polygon(&uv, poly);
                }
                LoopOrientation::Inner => {
                    if point_in_polygon(&uv, poly) {
                        return false;
                    }
                }
            }
        }
        !has_outer || in_outer
    }

    fn trim_loops(&self) -> &[TrimLoop] {
        &self.loops
    }

    fn surface_type(&self) -> SurfaceKind {
        SurfaceKind::Trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CylinderSurface, Plane};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_point_in_polygon_square() {
        let square = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];

        assert!(point_in_polygon(&Point2::new(0.5, 0.5), &square));
        assert!(!point_in_polygon(&Point2::new(1.5, 0.5), &square));
        assert!(!point_in_polygon(&Point2::new(-0.1, 0.5), &square));
    }

    #[test]
    fn test_point_in_polygon_concave() {
        let l_shape = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 2.0),
            Point2::new(0.0, 2.0),
        ];

        assert!(point_in_polygon(&Point2::new(0.5, 1.5), &l_shape));
        assert!(!point_in_polygon(&Point2::new(1.5, 1.5), &l_shape));
    }

    #[test]
    fn test_trimmed_plane_with_hole() {
        let plane = Plane::xy();
        let face = TrimmedSurface::new(
            &plane,
            vec![
                TrimLoop::rectangle(-1.0, 1.0, -1.0, 1.0, LoopOrientation::Outer, 0),
                TrimLoop::circle(Point2::origin(), 0.25, LoopOrientation::Inner),
            ],
        );
        assert!(face.is_in_trim(Point2::new(0.5, 0.5)));
        assert!(!face.is_in_trim(Point2::new(0.1, 0.0)));
        assert!(!face.is_in_trim(Point2::new(2.0, 0.0)));
        assert_eq!(face.domain(), ((-1.0, 1.0), (-1.0, 1.0)));
        assert_eq!(face.trim_loops().len(), 2);
    }

    #[test]
    fn test_trimmed_periodic_wraps() {
        let cyl = CylinderSurface::new(1.0);
        let face = TrimmedSurface::new(
            &cyl,
            vec![TrimLoop::rectangle(0.5, 1.5, 0.0, 2.0, LoopOrientation::Outer, 0)],
        );
        assert!(face.is_in_trim(Point2::new(1.0 + 2.0 * PI, 1.0)));
        assert!(!face.is_in_trim(Point2::new(3.0, 1.0)));
        // Periodic direction keeps the base range.
        assert_abs_diff_eq!(face.domain().0 .1, 2.0 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_line_crossing() {
        let lp = TrimLoop::rectangle(0.0, 1.0, 0.0, 1.0, LoopOrientation::Outer, 10);
        let hits = lp.crossings(Point2::new(0.5, 0.5), Point2::new(1.5, 0.5));
        assert_eq!(hits.len(), 1);
        let hit = hits[0];
        assert_eq!(hit.arc_index, 1);
        assert_abs_diff_eq!(hit.uv.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(hit.arc_param, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(hit.segment_param, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_circle_crossing_refined() {
        let lp = TrimLoop::circle(Point2::origin(), 1.0, LoopOrientation::Outer);
        let hits = lp.crossings(Point2::new(0.0, 0.3), Point2::new(2.0, 0.3));
        assert_eq!(hits.len(), 1);
        let hit = hits[0];
        assert_abs_diff_eq!(hit.uv.coords.norm(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(hit.uv.y, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_vertex_at_endpoints() {
        let lp = TrimLoop::rectangle(0.0, 1.0, 0.0, 1.0, LoopOrientation::Outer, 7);
        let arc = &lp.arcs[0];
        assert_eq!(arc.vertex_at(0.0, 1e-9), Some(VertexRef(7)));
        assert_eq!(arc.vertex_at(1.0, 1e-9), Some(VertexRef(8)));
        assert_eq!(arc.vertex_at(0.5, 1e-9), None);
    }

    #[test]
    fn test_material_side() {
        assert!(LoopOrientation::Outer.material_on_left());
        assert!(!LoopOrientation::Inner.material_on_left());
    }
}
