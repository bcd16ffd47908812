//! Refinement of section lines against the exact surfaces, trim clipping and
//! point classification.
//!
//! Line points are corrected by Newton iteration on
//! `S1(u1, v1) - S2(u2, v2) = 0` constrained to the plane through the coarse
//! point orthogonal to the local chord, which keeps the refined points in
//! chain order. Where that system is singular (tangent surfaces) a damped
//! Gauss-Newton minimization of the gap takes over. A point that does not reach
//! the tolerance is kept at its best estimate and flagged low-confidence.

use log::{debug, warn};
use nalgebra::{Matrix3x4, Matrix4, Vector4};
use ssi_geom::{ArcRef, LoopOrientation, Surface, SurfaceKind};
use ssi_math::{wrap_into, PeriodPair, Point2, Point3, Vec2, Vec3};

use crate::couple::SeedPoint;
use crate::point::{BoundaryAnchor, IntersectionPoint, SurfaceSide};
use crate::section::SectionLine;
use crate::settings::IntersectionSettings;
use crate::transition::{arc_transition, line_transitions, TouchSide, Transition};
use crate::wline::{CreationWay, WLine};

/// Iterations of the boundary bisection when no trim arc is available.
const BISECTION_STEPS: usize = 48;

/// Newton steps when projecting on a boundary arc.
const ARC_PROJECTION_STEPS: usize = 8;

/// Result of one point solve.
#[derive(Debug, Clone, Copy)]
struct Solve {
    uv1: Point2,
    uv2: Point2,
    gap: f64,
}

/// A boundary arc near a parameter pair.
#[derive(Debug, Clone, Copy)]
struct ArcHit {
    arc: ArcRef,
    param: f64,
    orientation: LoopOrientation,
}

/// Output of [`Refiner::refine_line`].
#[derive(Debug, Default)]
pub struct RefinedSection {
    /// Walking lines; more than one when trimming splits the section.
    pub lines: Vec<WLine>,
    /// Sections that collapsed to a single point.
    pub points: Vec<IntersectionPoint>,
    /// Points that did not reach the tolerance.
    pub low_confidence: usize,
}

/// Refines coarse geometry of one surface pair.
#[derive(Debug)]
pub struct Refiner<'s> {
    s1: &'s dyn Surface,
    s2: &'s dyn Surface,
    settings: &'s IntersectionSettings,
    periods: [PeriodPair; 2],
}

impl<'s> Refiner<'s> {
    /// Refiner for `s1` against `s2`.
    pub fn new(s1: &'s dyn Surface, s2: &'s dyn Surface, settings: &'s IntersectionSettings) -> Self {
        Self {
            s1,
            s2,
            settings,
            periods: [
                PeriodPair::new(s1.u_period(), s1.v_period()),
                PeriodPair::new(s2.u_period(), s2.v_period()),
            ],
        }
    }

    fn surface(&self, side: SurfaceSide) -> &'s dyn Surface {
        match side {
            SurfaceSide::S1 => self.s1,
            SurfaceSide::S2 => self.s2,
        }
    }

    fn tol(&self) -> f64 {
        self.settings.tolerance
    }

    fn gap_vector(&self, uv1: Point2, uv2: Point2) -> Vec3 {
        self.s1.evaluate(uv1) - self.s2.evaluate(uv2)
    }

    /// Newton iteration on the surface pair constrained to the plane through
    /// `origin` with normal `dir` (unit).
    fn solve_on_plane(&self, seed: &SeedPoint, dir: &Vec3) -> Option<Solve> {
        let (s1, s2) = (self.s1, self.s2);
        let target = 0.01 * self.tol();
        let mut uv1 = seed.uv1;
        let mut uv2 = seed.uv2;
        for _ in 0..self.settings.max_newton_iterations {
            let p1 = s1.evaluate(uv1);
            let f = p1 - s2.evaluate(uv2);
            let g = dir.dot(&(p1 - seed.point));
            if f.norm() <= target && g.abs() <= target {
                break;
            }
            let (a1, b1) = (s1.d_du(uv1), s1.d_dv(uv1));
            let (a2, b2) = (s2.d_du(uv2), s2.d_dv(uv2));
            #[rustfmt::skip]
            let jac = Matrix4::new(
                a1.x, b1.x, -a2.x, -b2.x,
                a1.y, b1.y, -a2.y, -b2.y,
                a1.z, b1.z, -a2.z, -b2.z,
                dir.dot(&a1), dir.dot(&b1), 0.0, 0.0,
            );
            let step = jac.lu().solve(&-Vector4::new(f.x, f.y, f.z, g))?;
            if !step.iter().all(|x| x.is_finite()) {
                return None;
            }
            uv1 = clamp_to_domain(s1, uv1 + Vec2::new(step[0], step[1]));
            uv2 = clamp_to_domain(s2, uv2 + Vec2::new(step[2], step[3]));
            if step.norm() <= 1e-15 * (1.0 + uv1.coords.norm() + uv2.coords.norm()) {
                break;
            }
        }
        let gap = self.gap_vector(uv1, uv2).norm();
        gap.is_finite().then_some(Solve { uv1, uv2, gap })
    }

    /// Damped Gauss-Newton minimization of `|S1 - S2|`. Converges on
    /// touching points where the constrained system is singular.
    fn solve_min_gap(&self, seed: &SeedPoint) -> Solve {
        let (s1, s2) = (self.s1, self.s2);
        let stop = 1e-6 * self.tol();
        let mut uv1 = seed.uv1;
        let mut uv2 = seed.uv2;
        let mut f = self.gap_vector(uv1, uv2);
        let mut gap = f.norm();
        let mut lambda = 1e-9;
        for _ in 0..self.settings.max_newton_iterations {
            if gap <= stop || gap.is_nan() {
                break;
            }
            let jac = Matrix3x4::from_columns(&[
                s1.d_du(uv1),
                s1.d_dv(uv1),
                -s2.d_du(uv2),
                -s2.d_dv(uv2),
            ]);
            let jt = jac.transpose();
            let h = jt * jac;
            let grad = jt * f;
            let scale = h.trace().max(f64::MIN_POSITIVE);
            let mut improved = false;
            for _ in 0..8 {
                let damped = h + Matrix4::identity() * (lambda * scale);
                let Some(step) = damped.lu().solve(&-grad) else {
                    lambda *= 10.0;
                    continue;
                };
                let n1 = clamp_to_domain(s1, uv1 + Vec2::new(step[0], step[1]));
                let n2 = clamp_to_domain(s2, uv2 + Vec2::new(step[2], step[3]));
                let nf = self.gap_vector(n1, n2);
                if nf.norm() < gap {
                    uv1 = n1;
                    uv2 = n2;
                    f = nf;
                    gap = nf.norm();
                    lambda = (lambda * 0.1).max(1e-15);
                    improved = true;
                    break;
                }
                lambda *= 10.0;
            }
            if !improved {
                break;
            }
        }
        Solve { uv1, uv2, gap }
    }

    fn make_point(&self, s: Solve) -> IntersectionPoint {
        let p1 = self.s1.evaluate(s.uv1);
        let p2 = self.s2.evaluate(s.uv2);
        let mut p = IntersectionPoint::new(
            Point3::from((p1.coords + p2.coords) * 0.5),
            s.uv1,
            s.uv2,
            self.tol(),
        );
        if s.gap > self.tol() {
            p.low_confidence = true;
            p.tolerance = s.gap;
        }
        p
    }

    /// Refine a line point in the plane orthogonal to `dir`.
    pub fn refine_on_plane(&self, seed: &SeedPoint, dir: &Vec3) -> IntersectionPoint {
        let marched = dir
            .try_normalize(f64::MIN_POSITIVE)
            .and_then(|d| self.solve_on_plane(seed, &d));
        let solve = match marched {
            Some(s) if s.gap <= self.tol() => s,
            other => {
                let fallback = self.solve_min_gap(seed);
                match other {
                    Some(s) if s.gap < fallback.gap => s,
                    _ => fallback,
                }
            }
        };
        self.make_point(solve)
    }

    /// Refine a point where the surfaces may touch.
    pub fn refine_touching(&self, seed: &SeedPoint) -> IntersectionPoint {
        self.make_point(self.solve_min_gap(seed))
    }

    /// Refine an isolated contact. Returns `None` when it does not converge
    /// or lies outside a trim.
    pub fn refine_isolated(&self, seed: &SeedPoint) -> Option<IntersectionPoint> {
        let mut p = self.refine_touching(seed);
        if p.low_confidence || !self.is_inside(&p) {
            return None;
        }
        self.classify_isolated(&mut p);
        for side in [SurfaceSide::S1, SurfaceSide::S2] {
            if let Some(hit) = self.nearest_arc(side, p.uv(side)) {
                p.set_arc(
                    side,
                    BoundaryAnchor {
                        arc: hit.arc,
                        param: hit.param,
                        transition: Transition::undecided(),
                    },
                );
                p.vertex = p.vertex.or_else(|| self.arc_vertex(side, &hit));
            }
        }
        Some(p)
    }

    /// Refine the best seed of a cluster of circumscribed-only contacts into
    /// a touching point. Non-tangent results belong to lines and are rejected.
    pub fn refine_near_cluster(&self, seeds: &[SeedPoint]) -> Option<IntersectionPoint> {
        let best = seeds.iter().min_by(|a, b| {
            let ga = self.gap_vector(a.uv1, a.uv2).norm();
            let gb = self.gap_vector(b.uv1, b.uv2).norm();
            ga.total_cmp(&gb)
        })?;
        let p = self.refine_isolated(best)?;
        p.is_tangent.then_some(p)
    }

    /// Intersection point halfway across the gap from line end `a` to line
    /// end `b`, classified for travel from `a` to `b`. `None` when the
    /// midpoint does not converge onto both surfaces inside both trims.
    pub fn bridge_point(&self, a: &IntersectionPoint, b: &IntersectionPoint) -> Option<IntersectionPoint> {
        let dir = b.point - a.point;
        let uv1 = self.periods[0].adjust(b.uv1, a.uv1);
        let uv2 = self.periods[1].adjust(b.uv2, a.uv2);
        let seed = SeedPoint {
            point: Point3::from((a.point.coords + b.point.coords) * 0.5),
            uv1: Point2::from((a.uv1.coords + uv1.coords) * 0.5),
            uv2: Point2::from((a.uv2.coords + uv2.coords) * 0.5),
        };
        let mut p = self.refine_on_plane(&seed, &dir);
        if p.low_confidence || !self.is_inside(&p) || (p.point - seed.point).norm() > 0.5 * dir.norm() {
            return None;
        }
        p.uv1 = self.periods[0].adjust(p.uv1, a.uv1);
        p.uv2 = self.periods[1].adjust(p.uv2, a.uv2);
        let (t1, t2, tangent) = line_transitions(
            &dir,
            self.s1.normal(p.uv1),
            self.s2.normal(p.uv2),
            self.settings.tangent_angle,
        );
        p.transition_s1 = t1;
        p.transition_s2 = t2;
        p.is_tangent = tangent;
        Some(p)
    }

    fn classify_isolated(&self, p: &mut IntersectionPoint) {
        let n1 = self.s1.normal(p.uv1);
        let n2 = self.s2.normal(p.uv2);
        let (Some(n1), Some(n2)) = (n1, n2) else {
            return;
        };
        if n1.cross(n2.as_ref()).norm() <= self.settings.tangent_angle.sin() {
            let opposite = n1.dot(n2.as_ref()) < 0.0;
            p.is_tangent = true;
            p.transition_s1 = Transition::touch(TouchSide::Unknown, opposite);
            p.transition_s2 = p.transition_s1;
        }
    }

    /// Parameter-space tolerance of a surface at `uv`.
    fn param_tol(&self, side: SurfaceSide, uv: Point2) -> f64 {
        let s = self.surface(side);
        let speed = s.d_du(uv).norm().max(s.d_dv(uv).norm());
        if speed > f64::MIN_POSITIVE {
            10.0 * self.tol() / speed
        } else {
            10.0 * self.tol()
        }
    }

    /// `uv` shifted into the base period of the surface.
    fn normalized(&self, side: SurfaceSide, uv: Point2) -> Point2 {
        let s = self.surface(side);
        let ((u0, _), (v0, _)) = s.domain();
        let p = &self.periods[side_index(side)];
        Point2::new(
            p.u.map_or(uv.x, |period| wrap_into(uv.x, u0, period)),
            p.v.map_or(uv.y, |period| wrap_into(uv.y, v0, period)),
        )
    }

    /// Closest boundary arc within the parameter tolerance.
    fn nearest_arc(&self, side: SurfaceSide, uv: Point2) -> Option<ArcHit> {
        let loops = self.surface(side).trim_loops();
        if loops.is_empty() {
            return None;
        }
        let q = self.normalized(side, uv);
        let mut best: Option<(f64, ArcHit)> = None;
        for (loop_index, lp) in loops.iter().enumerate() {
            for (arc_index, arc) in lp.arcs.iter().enumerate() {
                let samples = arc.sample();
                let mut t = samples.first().map_or(arc.first, |s| s.0);
                let mut d_best = f64::INFINITY;
                for w in samples.windows(2) {
                    let (ta, a) = w[0];
                    let (tb, b) = w[1];
                    let ab = b - a;
                    let len2 = ab.norm_squared();
                    let s = if len2 > 0.0 {
                        ((q - a).dot(&ab) / len2).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    let d = (a + ab * s - q).norm();
                    if d < d_best {
                        d_best = d;
                        t = ta + (tb - ta) * s;
                    }
                }
                let (lo, hi) = (arc.first.min(arc.last), arc.first.max(arc.last));
                for _ in 0..ARC_PROJECTION_STEPS {
                    let c = arc.value(t);
                    let d = arc.direction(t);
                    let dd = d.norm_squared();
                    if dd <= f64::MIN_POSITIVE {
                        break;
                    }
                    t = (t - (c - q).dot(&d) / dd).clamp(lo, hi);
                }
                let dist = (arc.value(t) - q).norm();
                if best.as_ref().map_or(true, |(bd, _)| dist < *bd) {
                    best = Some((
                        dist,
                        ArcHit {
                            arc: ArcRef {
                                loop_index,
                                arc_index,
                            },
                            param: t,
                            orientation: lp.orientation,
                        },
                    ));
                }
            }
        }
        let (dist, hit) = best?;
        (dist <= self.param_tol(side, uv)).then_some(hit)
    }

    fn arc_vertex(&self, side: SurfaceSide, hit: &ArcHit) -> Option<ssi_geom::VertexRef> {
        let arc = &self.surface(side).trim_loops()[hit.arc.loop_index].arcs[hit.arc.arc_index];
        let span = (arc.last - arc.first).abs().max(f64::MIN_POSITIVE);
        arc.vertex_at(hit.param, 1e-6 * span)
    }

    fn inside_on(&self, side: SurfaceSide, uv: Point2) -> bool {
        self.surface(side).is_in_trim(uv) || self.nearest_arc(side, uv).is_some()
    }

    fn is_inside(&self, p: &IntersectionPoint) -> bool {
        self.inside_on(SurfaceSide::S1, p.uv1) && self.inside_on(SurfaceSide::S2, p.uv2)
    }

    /// Anchor `p` on every boundary arc it lies on, classifying the crossing
    /// against the arc for a line heading along `line_dir` (parameters of
    /// each surface).
    fn anchor(&self, p: &mut IntersectionPoint, line_dir: [Vec2; 2]) {
        for side in [SurfaceSide::S1, SurfaceSide::S2] {
            if p.anchor(side).is_some() {
                continue;
            }
            let Some(hit) = self.nearest_arc(side, p.uv(side)) else {
                continue;
            };
            let arc = &self.surface(side).trim_loops()[hit.arc.loop_index].arcs[hit.arc.arc_index];
            let transition = arc_transition(
                &line_dir[side_index(side)],
                &arc.direction(hit.param),
                hit.orientation,
                self.settings.tangent_angle,
            );
            p.set_arc(
                side,
                BoundaryAnchor {
                    arc: hit.arc,
                    param: hit.param,
                    transition,
                },
            );
            if p.vertex.is_none() {
                p.vertex = self.arc_vertex(side, &hit);
            }
        }
    }

    /// Boundary point between `a` (inside) and `b` (outside), or the reverse.
    ///
    /// The crossing of the parameter chord with the trim arcs seeds a refined
    /// point; while that point misses the arcs, the bracket is narrowed on
    /// its side and the crossing recomputed.
    fn locate_boundary(&self, a: &IntersectionPoint, b: &IntersectionPoint) -> IntersectionPoint {
        let start_inside = self.is_inside(a);
        let mut lo = a.clone();
        let mut hi = b.clone();
        let mut point = self.boundary_on_chord(&lo, &hi);
        for _ in 0..4 {
            let anchored = [SurfaceSide::S1, SurfaceSide::S2]
                .into_iter()
                .any(|side| self.nearest_arc(side, point.uv(side)).is_some());
            let has_loops = !self.s1.trim_loops().is_empty() || !self.s2.trim_loops().is_empty();
            if anchored || !has_loops {
                break;
            }
            if self.is_inside(&point) == start_inside {
                lo = point;
            } else {
                hi = point;
            }
            point = self.boundary_on_chord(&lo, &hi);
        }
        point
    }

    fn boundary_on_chord(&self, a: &IntersectionPoint, b: &IntersectionPoint) -> IntersectionPoint {
        let dir3 = b.point - a.point;
        let mut t = None;
        for side in [SurfaceSide::S1, SurfaceSide::S2] {
            if self.inside_on(side, a.uv(side)) == self.inside_on(side, b.uv(side)) {
                continue;
            }
            let loops = self.surface(side).trim_loops();
            if loops.is_empty() {
                continue;
            }
            let ua = self.normalized(side, a.uv(side));
            let ub = ua + (b.uv(side) - a.uv(side));
            let hit = loops
                .iter()
                .flat_map(|lp| lp.crossings(ua, ub))
                .map(|c| c.segment_param)
                .min_by(|x, y| x.total_cmp(y));
            if let Some(s) = hit {
                t = Some(t.map_or(s, |t0: f64| t0.min(s)));
            }
        }
        let t = t.unwrap_or_else(|| self.bisect_boundary(a, b));
        let lerp = |x: Point2, y: Point2| x + (y - x) * t;
        let seed = SeedPoint {
            point: a.point + dir3 * t,
            uv1: lerp(a.uv1, b.uv1),
            uv2: lerp(a.uv2, b.uv2),
        };
        self.refine_on_plane(&seed, &dir3)
    }

    /// Fraction along `a → b` where the trim status changes.
    fn bisect_boundary(&self, a: &IntersectionPoint, b: &IntersectionPoint) -> f64 {
        let at = |t: f64| {
            self.inside_on(SurfaceSide::S1, a.uv1 + (b.uv1 - a.uv1) * t)
                && self.inside_on(SurfaceSide::S2, a.uv2 + (b.uv2 - a.uv2) * t)
        };
        let start = at(0.0);
        let (mut lo, mut hi) = (0.0, 1.0);
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if at(mid) == start {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }

    /// Refine a section line into walking lines.
    pub fn refine_line(&self, section: &SectionLine) -> RefinedSection {
        let mut out = RefinedSection::default();
        let mut seeds = section.points.clone();
        let closed = section.closed && seeds.len() > 3;
        if closed {
            seeds.pop();
        }
        let n = seeds.len();
        if n == 0 {
            return out;
        }

        // Refine in chain order.
        let mut points: Vec<IntersectionPoint> = Vec::with_capacity(n);
        for i in 0..n {
            let (prev, next) = neighbours(i, n, closed);
            let dir = seeds[next].point - seeds[prev].point;
            let mut p = self.refine_on_plane(&seeds[i], &dir);
            if let Some(last) = points.last() {
                p.uv1 = self.periods[0].adjust(p.uv1, last.uv1);
                p.uv2 = self.periods[1].adjust(p.uv2, last.uv2);
            }
            points.push(p);
        }
        let low = points.iter().filter(|p| p.low_confidence).count();
        if low > 0 {
            warn!("refinement: {} of {} points did not converge", low, n);
        }
        out.low_confidence = low;

        // Drop duplicates left by the refinement.
        let tol = self.tol();
        let mut points = dedup_keep_ends(points, tol);
        if closed && points.len() > 1 {
            let (first, last) = (&points[0], &points[points.len() - 1]);
            if (first.point - last.point).norm() <= tol {
                points.pop();
            }
        }
        let closed = closed && points.len() > 2;
        if points.len() < 2 {
            if let Some(p) = points.pop() {
                if let Some(p) = self.refine_isolated(&SeedPoint {
                    point: p.point,
                    uv1: p.uv1,
                    uv2: p.uv2,
                }) {
                    out.points.push(p);
                }
            }
            return out;
        }

        for run in self.clip(points, closed) {
            if let Some(line) = self.build_wline(run.points, run.closed) {
                out.lines.push(line);
            }
        }
        out
    }

    /// Split a refined point sequence into its in-trim runs.
    fn clip(&self, mut points: Vec<IntersectionPoint>, closed: bool) -> Vec<Run> {
        let inside: Vec<bool> = points.iter().map(|p| self.is_inside(p)).collect();
        if inside.iter().all(|&x| x) {
            if closed {
                let mut last = points[0].clone();
                let prev = &points[points.len() - 1];
                last.uv1 = self.periods[0].adjust(last.uv1, prev.uv1);
                last.uv2 = self.periods[1].adjust(last.uv2, prev.uv2);
                points.push(last);
            }
            return vec![Run { points, closed }];
        }

        let (points, inside) = if closed {
            // Restart the loop at an outside point and walk back to it.
            let k = inside.iter().position(|&x| !x).unwrap_or(0);
            let mut rotated: Vec<IntersectionPoint> = Vec::with_capacity(points.len() + 1);
            let mut flags = Vec::with_capacity(points.len() + 1);
            for i in 0..=points.len() {
                let j = (k + i) % points.len();
                let mut p = points[j].clone();
                if let Some(prev) = rotated.last() {
                    p.uv1 = self.periods[0].adjust(p.uv1, prev.uv1);
                    p.uv2 = self.periods[1].adjust(p.uv2, prev.uv2);
                }
                rotated.push(p);
                flags.push(inside[j]);
            }
            (rotated, flags)
        } else {
            (points, inside)
        };

        let mut runs = Vec::new();
        let mut current: Vec<IntersectionPoint> = Vec::new();
        for i in 0..points.len() {
            if i > 0 && inside[i] != inside[i - 1] {
                let boundary = self.locate_boundary(&points[i - 1], &points[i]);
                current.push(boundary);
                if !inside[i] {
                    runs.push(Run {
                        points: std::mem::take(&mut current),
                        closed: false,
                    });
                }
            }
            if inside[i] {
                current.push(points[i].clone());
            }
        }
        if !current.is_empty() {
            runs.push(Run {
                points: current,
                closed: false,
            });
        }
        runs.retain(|r| r.points.len() >= 2);
        debug!("clipping: {} points -> {} runs", points.len(), runs.len());
        runs
    }

    /// Classify a run of points and wrap it into a [`WLine`].
    fn build_wline(&self, points: Vec<IntersectionPoint>, closed: bool) -> Option<WLine> {
        let tol = self.tol();
        let mut points = dedup_keep_ends(points, tol);
        let n = points.len();
        if n < 2 {
            return None;
        }

        // Neighbour directions, ignoring the duplicated closing point.
        let m = if closed { n - 1 } else { n };
        let mut dirs = Vec::with_capacity(n);
        for i in 0..n {
            let k = if closed && i == n - 1 { 0 } else { i };
            let (prev, next) = neighbours(k, m, closed);
            let d3 = points[next].point - points[prev].point;
            let d1 = self.periods[0].adjust(points[next].uv1, points[prev].uv1) - points[prev].uv1;
            let d2 = self.periods[1].adjust(points[next].uv2, points[prev].uv2) - points[prev].uv2;
            dirs.push((d3, [d1, d2]));
        }

        for (p, (d3, _)) in points.iter_mut().zip(&dirs) {
            let (t1, t2, tangent) = line_transitions(
                d3,
                self.s1.normal(p.uv1),
                self.s2.normal(p.uv2),
                self.settings.tangent_angle,
            );
            p.transition_s1 = t1;
            p.transition_s2 = t2;
            p.is_tangent = tangent;
        }
        // Only the ends of an open run can sit on a boundary.
        if !closed {
            let last = n - 1;
            for i in [0, last] {
                let duv = dirs[i].1;
                self.anchor(&mut points[i], duv);
            }
        }

        let tangent_line = points.iter().all(|p| p.is_tangent);
        let mut line = WLine::new(points, tangent_line, self.periods[0], self.periods[1]);
        line.set_creation_way(creation_way(self.s1, self.s2));

        let anchored: Vec<IntersectionPoint> = line
            .points()
            .iter()
            .filter(|p| p.is_on_boundary() || p.vertex.is_some())
            .cloned()
            .collect();
        for v in anchored {
            if let Some(a) = v.on_s1 {
                if line.arc_on_s1().is_none() {
                    line.set_arc_on_s1(a.arc);
                }
            }
            if let Some(a) = v.on_s2 {
                if line.arc_on_s2().is_none() {
                    line.set_arc_on_s2(a.arc);
                }
            }
            line.add_vertex(v);
        }
        line.compute_vertex_parameters(tol, false);
        Some(line)
    }
}

#[derive(Debug)]
struct Run {
    points: Vec<IntersectionPoint>,
    closed: bool,
}

/// Merge consecutive points closer than their tolerance. The last point
/// survives a merge with its predecessor so boundary ends are kept.
fn dedup_keep_ends(points: Vec<IntersectionPoint>, tol: f64) -> Vec<IntersectionPoint> {
    let n = points.len();
    let mut out: Vec<IntersectionPoint> = Vec::with_capacity(n);
    for (i, p) in points.into_iter().enumerate() {
        let len = out.len();
        if let Some(last) = out.last_mut() {
            if (p.point - last.point).norm() <= tol.max(p.tolerance) {
                if i == n - 1 && len > 1 {
                    *last = p;
                }
                continue;
            }
        }
        out.push(p);
    }
    out
}

fn side_index(side: SurfaceSide) -> usize {
    match side {
        SurfaceSide::S1 => 0,
        SurfaceSide::S2 => 1,
    }
}

/// Indices of the neighbours used for the local direction at `i`.
fn neighbours(i: usize, n: usize, closed: bool) -> (usize, usize) {
    if n < 2 {
        return (0, 0);
    }
    if closed {
        ((i + n - 1) % n, (i + 1) % n)
    } else if i == 0 {
        (0, 1)
    } else if i == n - 1 {
        (n - 2, n - 1)
    } else {
        (i - 1, i + 1)
    }
}

fn clamp_to_domain(s: &dyn Surface, uv: Point2) -> Point2 {
    let ((u0, u1), (v0, v1)) = s.domain();
    let u = if s.u_period().is_some() {
        uv.x
    } else {
        uv.x.max(u0).min(u1)
    };
    let v = if s.v_period().is_some() {
        uv.y
    } else {
        uv.y.max(v0).min(v1)
    };
    Point2::new(u, v)
}

fn is_analytic(kind: SurfaceKind) -> bool {
    matches!(
        kind,
        SurfaceKind::Plane
            | SurfaceKind::Cylinder
            | SurfaceKind::Cone
            | SurfaceKind::Sphere
            | SurfaceKind::Torus
    )
}

fn creation_way(s1: &dyn Surface, s2: &dyn Surface) -> CreationWay {
    match (is_analytic(s1.surface_type()), is_analytic(s2.surface_type())) {
        (true, true) => CreationWay::ImpImp,
        (false, false) => CreationWay::PrmPrm,
        _ => CreationWay::ImpPrm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transition::TransitionKind;
    use approx::assert_abs_diff_eq;
    use ssi_geom::{CylinderSurface, Plane, SphereSurface, TrimLoop, TrimmedSurface};
    use std::f64::consts::PI;

    fn settings() -> IntersectionSettings {
        IntersectionSettings::default()
    }

    #[test]
    fn test_refine_on_plane_converges() {
        let s1 = SphereSurface::new(1.0);
        let s2 = Plane::from_normal(Point3::new(0.0, 0.0, 0.5), Vec3::z());
        let cfg = settings();
        let r = Refiner::new(&s1, &s2, &cfg);
        // Rough seed near (0.866, 0, 0.5).
        let guess = Point3::new(0.85, 0.02, 0.52);
        let seed = SeedPoint {
            point: guess,
            uv1: Point2::new(0.02, 0.55),
            uv2: s2.project(&guess),
        };
        let p = r.refine_on_plane(&seed, &Vec3::y());
        assert!(!p.low_confidence);
        assert!(p.gap(&s1, &s2) <= cfg.tolerance);
        assert_abs_diff_eq!(p.point.z, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(p.point.coords.norm(), 1.0, epsilon = 1e-6);
        // Stays in the plane y = 0.02 through the seed.
        assert_abs_diff_eq!(p.point.y, 0.02, epsilon = 1e-6);
    }

    #[test]
    fn test_refine_touching_point() {
        let s1 = SphereSurface::new(1.0);
        let s2 = Plane::from_normal(Point3::new(0.0, 0.0, 1.0), Vec3::z());
        let cfg = settings();
        let r = Refiner::new(&s1, &s2, &cfg);
        let guess = Point3::new(0.1, 0.05, 1.0);
        let seed = SeedPoint {
            point: guess,
            uv1: Point2::new(0.4, 1.4),
            uv2: s2.project(&guess),
        };
        let p = r.refine_isolated(&seed).unwrap();
        assert!(p.is_tangent);
        assert!(p.transition_s1.is_touch());
        assert_abs_diff_eq!((p.point - Point3::new(0.0, 0.0, 1.0)).norm(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_unconverged_point_is_flagged_not_dropped() {
        let s1 = SphereSurface::new(1.0);
        let s2 = SphereSurface::with_center(Point3::new(5.0, 0.0, 0.0), 1.0);
        let cfg = settings();
        let r = Refiner::new(&s1, &s2, &cfg);
        let seed = SeedPoint {
            point: Point3::new(2.5, 0.0, 0.0),
            uv1: Point2::new(0.0, 0.0),
            uv2: Point2::new(PI, 0.0),
        };
        let p = r.refine_on_plane(&seed, &Vec3::y());
        assert!(p.low_confidence);
        assert!(p.tolerance >= p.gap(&s1, &s2) - 1e-12);
        assert!(r.refine_isolated(&seed).is_none());
    }

    #[test]
    fn test_refine_line_open_planes() {
        let s1 = Plane::xy();
        let s2 = Plane::xz();
        let cfg = settings();
        let r = Refiner::new(&s1, &s2, &cfg);
        let seeds: Vec<SeedPoint> = (0..5)
            .map(|i| {
                let p = Point3::new(i as f64, 1e-4, -1e-4);
                SeedPoint {
                    point: p,
                    uv1: s1.project(&p),
                    uv2: s2.project(&p),
                }
            })
            .collect();
        let out = r.refine_line(&SectionLine {
            points: seeds,
            closed: false,
        });
        assert_eq!(out.lines.len(), 1);
        assert_eq!(out.low_confidence, 0);
        let line = &out.lines[0];
        assert_eq!(line.nb_pnts(), 5);
        assert!(!line.is_closed());
        assert!(!line.is_tangent_line());
        assert_eq!(line.creation_way(), CreationWay::ImpImp);
        let k1 = line.point(0).transition_s1.kind;
        assert!(matches!(k1, TransitionKind::In | TransitionKind::Out));
        for p in line.points() {
            assert!(p.gap(&s1, &s2) <= cfg.tolerance);
            assert_eq!(p.transition_s1.kind, k1);
            assert_abs_diff_eq!(p.point.y, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(p.point.z, 0.0, epsilon = 1e-9);
        }
        // Open ends without boundaries are not genuine.
        assert!(!line.first_marker().unwrap().genuine);
        assert!(!line.last_marker().unwrap().genuine);
    }

    #[test]
    fn test_refine_line_across_seam() {
        // Circle z = 0.5 on a cylinder, seeded across u = 0.
        let s1 = CylinderSurface::new(1.0);
        let s2 = Plane::from_normal(Point3::new(0.0, 0.0, 0.5), Vec3::z());
        let cfg = settings();
        let r = Refiner::new(&s1, &s2, &cfg);
        let us = [2.0 * PI - 0.2, 2.0 * PI - 0.1, 0.0, 0.1, 0.2];
        let seeds: Vec<SeedPoint> = us
            .iter()
            .map(|&u| {
                let p = s1.evaluate(Point2::new(u, 0.45));
                SeedPoint {
                    point: p,
                    uv1: Point2::new(u, 0.45),
                    uv2: s2.project(&p),
                }
            })
            .collect();
        let out = r.refine_line(&SectionLine {
            points: seeds,
            closed: false,
        });
        let line = &out.lines[0];
        let u: Vec<f64> = line.points().iter().map(|p| p.uv1.x).collect();
        assert!(u.windows(2).all(|w| (w[1] - w[0]).abs() < 0.5), "{:?}", u);
        for p in line.points() {
            assert_abs_diff_eq!(p.uv1.y, 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_clipped_line_gets_anchored_vertices() {
        let base = Plane::xy();
        let trimmed = TrimmedSurface::new(
            &base,
            vec![
                TrimLoop::rectangle(-2.0, 2.0, -2.0, 2.0, LoopOrientation::Outer, 0),
                TrimLoop::circle(Point2::origin(), 0.5, LoopOrientation::Inner),
            ],
        );
        let other = Plane::xz();
        let cfg = settings();
        let r = Refiner::new(&trimmed, &other, &cfg);
        let seeds: Vec<SeedPoint> = (0..=8)
            .map(|i| {
                let p = Point3::new(-2.0 + 0.5 * i as f64 + 0.1 * (i % 2) as f64, 0.0, 0.0);
                SeedPoint {
                    point: p,
                    uv1: base.project(&p),
                    uv2: other.project(&p),
                }
            })
            .collect();
        let out = r.refine_line(&SectionLine {
            points: seeds,
            closed: false,
        });
        assert_eq!(out.lines.len(), 2);
        for line in &out.lines {
            let hole: Vec<_> = line
                .vertices()
                .iter()
                .filter(|v| v.on_s1.is_some_and(|a| a.arc.loop_index == 1))
                .collect();
            assert_eq!(hole.len(), 1);
            let v = hole[0];
            assert_abs_diff_eq!(v.point.x.abs(), 0.5, epsilon = 1e-6);
            let expected = if v.param_on_line == 0.0 {
                TransitionKind::In
            } else {
                TransitionKind::Out
            };
            assert_eq!(v.on_s1.unwrap().transition.kind, expected);
            // Outer ends sit on the rectangle.
            let outer = line
                .vertices()
                .iter()
                .filter(|v| v.on_s1.is_some_and(|a| a.arc.loop_index == 0))
                .count();
            assert_eq!(outer, 1);
            assert!(line.first_marker().unwrap().genuine);
            assert!(line.last_marker().unwrap().genuine);
            assert!(line.arc_on_s1().is_some());
        }
    }

    #[test]
    fn test_bridge_point_lands_between_the_ends() {
        let s1 = Plane::xy();
        let s2 = Plane::xz();
        let cfg = settings();
        let r = Refiner::new(&s1, &s2, &cfg);
        let at = |x: f64| {
            let p = Point3::new(x, 0.0, 0.0);
            IntersectionPoint::new(p, s1.project(&p), s2.project(&p), 1e-7)
        };
        let mid = r.bridge_point(&at(1.0), &at(2.0)).unwrap();
        assert_abs_diff_eq!(mid.point.x, 1.5, epsilon = 1e-9);
        assert!(mid.gap(&s1, &s2) <= cfg.tolerance);
        assert!(mid.transition_s1.is_crossing());
        // Travelling the other way flips the classification.
        let back = r.bridge_point(&at(2.0), &at(1.0)).unwrap();
        assert_eq!(back.transition_s1, mid.transition_s1.reversed());

        // No intersection near the gap: a plane clear of the sphere.
        let sphere = SphereSurface::new(1.0);
        let above = Plane::from_normal(Point3::new(0.0, 0.0, 2.0), Vec3::z());
        let r = Refiner::new(&sphere, &above, &cfg);
        let a = IntersectionPoint::new(
            Point3::new(-1.0, 0.0, 1.0),
            Point2::new(PI, 0.0),
            Point2::new(-1.0, 0.0),
            1e-7,
        );
        let b = IntersectionPoint::new(
            Point3::new(1.0, 0.0, 1.0),
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            1e-7,
        );
        assert!(r.bridge_point(&a, &b).is_none());
    }

    #[test]
    fn test_dedup_keeps_the_last_point() {
        let at = |x: f64| {
            IntersectionPoint::new(Point3::new(x, 0.0, 0.0), Point2::new(x, 0.0), Point2::new(0.0, x), 1e-7)
        };
        let points = vec![at(0.0), at(1e-9), at(1.0), at(2.0), at(2.0 + 1e-9)];
        let out = dedup_keep_ends(points, 1e-6);
        let xs: Vec<f64> = out.iter().map(|p| p.point.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0 + 1e-9]);

        // A two-point run that collapses keeps its first point.
        let out = dedup_keep_ends(vec![at(0.0), at(1e-9)], 1e-6);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].point.x, 0.0);
    }

    #[test]
    fn test_neighbours() {
        assert_eq!(neighbours(0, 4, false), (0, 1));
        assert_eq!(neighbours(3, 4, false), (2, 3));
        assert_eq!(neighbours(0, 4, true), (3, 1));
        assert_eq!(neighbours(2, 4, false), (1, 3));
    }
}
