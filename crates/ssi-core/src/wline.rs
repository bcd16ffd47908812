//! Walking lines: the output curves of an intersection query.
//!
//! A [`WLine`] owns an ordered sequence of classified points plus a sorted
//! set of vertices (points anchored on boundaries or caller vertices, or the
//! open ends of the line). Vertex positions along the line are fractional
//! point indices stored in [`IntersectionPoint::param_on_line`].
//!
//! Bounding boxes are derived data: every mutation bumps a version counter
//! and drops the cache, the next query rebuilds it.

use std::fmt::Write as _;
use std::sync::OnceLock;

use log::debug;
use ssi_geom::ArcRef;
use ssi_math::{wrap_into, PeriodPair, Point2, Point3};

use crate::bbox::{Aabb2, Aabb3};
use crate::point::{BoundaryAnchor, IntersectionPoint};
use crate::transition::TransitionKind;

/// Parameter-space padding of the cached boxes.
const UV_BOX_PAD: f64 = 1e-9;

/// How the line was computed, by kind of the two surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreationWay {
    /// Both surfaces analytic.
    ImpImp,
    /// One analytic, one freeform.
    ImpPrm,
    /// Both freeform.
    PrmPrm,
    /// Not recorded.
    #[default]
    Unknown,
}

/// Marks the vertex at one end of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndMarker {
    /// Index into the vertex list.
    pub index: usize,
    /// A real topological end (boundary crossing or caller vertex) rather
    /// than an open or clipped end.
    pub genuine: bool,
}

/// Layout of [`WLine::dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    /// 3D points and both parameter pairs.
    Full,
    /// 3D points only.
    Points,
    /// Parameters on surface 1.
    Surface1,
    /// Parameters on surface 2.
    Surface2,
}

#[derive(Debug, Clone, Copy)]
struct LineBoxes {
    space: Aabb3,
    uv1: Aabb2,
    uv2: Aabb2,
}

/// One branch of an intersection curve.
#[derive(Debug, Clone)]
pub struct WLine {
    points: Vec<IntersectionPoint>,
    vertices: Vec<IntersectionPoint>,
    tangent: bool,
    periods1: PeriodPair,
    periods2: PeriodPair,
    arc_on_s1: Option<ArcRef>,
    arc_on_s2: Option<ArcRef>,
    creation_way: CreationWay,
    purger_allowed: bool,
    first: Option<EndMarker>,
    last: Option<EndMarker>,
    version: u64,
    boxes: OnceLock<LineBoxes>,
}

impl WLine {
    /// Line over `points` with the periods of both surfaces.
    pub fn new(
        points: Vec<IntersectionPoint>,
        tangent: bool,
        periods1: PeriodPair,
        periods2: PeriodPair,
    ) -> Self {
        let mut line = Self {
            points,
            vertices: Vec::new(),
            tangent,
            periods1,
            periods2,
            arc_on_s1: None,
            arc_on_s2: None,
            creation_way: CreationWay::Unknown,
            purger_allowed: true,
            first: None,
            last: None,
            version: 0,
            boxes: OnceLock::new(),
        };
        line.renumber_points();
        line
    }

    fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
        self.boxes.take();
    }

    fn renumber_points(&mut self) {
        for (i, p) in self.points.iter_mut().enumerate() {
            p.param_on_line = i as f64;
        }
    }

    /// Mutation counter; changes whenever points or vertices change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of points.
    pub fn nb_pnts(&self) -> usize {
        self.points.len()
    }

    /// Point `index` (0-based).
    pub fn point(&self, index: usize) -> &IntersectionPoint {
        &self.points[index]
    }

    /// All points in line order.
    pub fn points(&self) -> &[IntersectionPoint] {
        &self.points
    }

    /// Append a point.
    pub fn add_point(&mut self, mut p: IntersectionPoint) {
        p.param_on_line = self.points.len() as f64;
        self.points.push(p);
        self.touch();
    }

    /// Replace point `index`.
    pub fn set_point(&mut self, index: usize, mut p: IntersectionPoint) {
        p.param_on_line = index as f64;
        self.points[index] = p;
        self.touch();
    }

    /// Insert a point before `index`; vertices behind it move along.
    pub fn insert_point_before(&mut self, index: usize, p: IntersectionPoint) {
        let index = index.min(self.points.len());
        self.points.insert(index, p);
        for v in &mut self.vertices {
            if v.param_on_line >= index as f64 {
                v.param_on_line += 1.0;
            }
        }
        self.renumber_points();
        self.touch();
    }

    /// Remove point `index`; vertex parameters are remapped.
    pub fn remove_point(&mut self, index: usize) {
        if index >= self.points.len() {
            return;
        }
        self.points.remove(index);
        let n = self.points.len();
        for v in &mut self.vertices {
            v.param_on_line = remap_after_removal(v.param_on_line, index, n);
        }
        self.renumber_points();
        self.touch();
    }

    /// Number of vertices.
    pub fn nb_vertex(&self) -> usize {
        self.vertices.len()
    }

    /// Vertex `index` (0-based).
    pub fn vertex(&self, index: usize) -> &IntersectionPoint {
        &self.vertices[index]
    }

    /// All vertices.
    pub fn vertices(&self) -> &[IntersectionPoint] {
        &self.vertices
    }

    /// Append a vertex. Its `param_on_line` places it on the line.
    pub fn add_vertex(&mut self, v: IntersectionPoint) {
        self.vertices.push(v);
        self.touch();
    }

    /// Replace vertex `index`.
    pub fn replace(&mut self, index: usize, v: IntersectionPoint) {
        self.vertices[index] = v;
        self.touch();
    }

    /// Insert a vertex before vertex `index`.
    pub fn insert_vertex_before(&mut self, index: usize, v: IntersectionPoint) {
        let index = index.min(self.vertices.len());
        self.vertices.insert(index, v);
        for marker in [&mut self.first, &mut self.last].into_iter().flatten() {
            if marker.index >= index {
                marker.index += 1;
            }
        }
        self.touch();
    }

    /// Remove vertex `index`; end markers pointing at it are cleared.
    pub fn remove_vertex(&mut self, index: usize) {
        if index >= self.vertices.len() {
            return;
        }
        self.vertices.remove(index);
        for slot in [&mut self.first, &mut self.last] {
            *slot = match *slot {
                Some(m) if m.index == index => None,
                Some(m) if m.index > index => Some(EndMarker {
                    index: m.index - 1,
                    ..m
                }),
                other => other,
            };
        }
        self.touch();
    }

    /// Mark vertex `index` as the first point of the line.
    pub fn set_first_point(&mut self, index: usize, genuine: bool) {
        self.first = Some(EndMarker { index, genuine });
    }

    /// Mark vertex `index` as the last point of the line.
    pub fn set_last_point(&mut self, index: usize, genuine: bool) {
        self.last = Some(EndMarker { index, genuine });
    }

    /// First vertex and its index, if marked.
    pub fn first_point(&self) -> Option<(&IntersectionPoint, usize)> {
        self.first.map(|m| (&self.vertices[m.index], m.index))
    }

    /// Last vertex and its index, if marked.
    pub fn last_point(&self) -> Option<(&IntersectionPoint, usize)> {
        self.last.map(|m| (&self.vertices[m.index], m.index))
    }

    /// First-end marker.
    pub fn first_marker(&self) -> Option<EndMarker> {
        self.first
    }

    /// Last-end marker.
    pub fn last_marker(&self) -> Option<EndMarker> {
        self.last
    }

    /// The whole branch lies where the surfaces are tangent.
    pub fn is_tangent_line(&self) -> bool {
        self.tangent
    }

    /// Set the tangency flag.
    pub fn set_tangent_line(&mut self, tangent: bool) {
        self.tangent = tangent;
    }

    /// Periods of surface 1.
    pub fn periods_s1(&self) -> PeriodPair {
        self.periods1
    }

    /// Periods of surface 2.
    pub fn periods_s2(&self) -> PeriodPair {
        self.periods2
    }

    /// Boundary arc of surface 1 the line was found on, if any.
    pub fn arc_on_s1(&self) -> Option<ArcRef> {
        self.arc_on_s1
    }

    /// Boundary arc of surface 2 the line was found on, if any.
    pub fn arc_on_s2(&self) -> Option<ArcRef> {
        self.arc_on_s2
    }

    /// Record the boundary arc of surface 1.
    pub fn set_arc_on_s1(&mut self, arc: ArcRef) {
        self.arc_on_s1 = Some(arc);
    }

    /// Record the boundary arc of surface 2.
    pub fn set_arc_on_s2(&mut self, arc: ArcRef) {
        self.arc_on_s2 = Some(arc);
    }

    /// How the line was computed.
    pub fn creation_way(&self) -> CreationWay {
        self.creation_way
    }

    /// Record how the line was computed.
    pub fn set_creation_way(&mut self, way: CreationWay) {
        self.creation_way = way;
    }

    /// Whether the adjacent-vertex purge and [`WLine::purge`] may run.
    pub fn is_purger_allowed(&self) -> bool {
        self.purger_allowed
    }

    /// Allow or forbid the adjacent-vertex purge.
    pub fn set_purger_allowed(&mut self, allowed: bool) {
        self.purger_allowed = allowed;
    }

    /// True when the first and last points coincide within their tolerance.
    pub fn is_closed(&self) -> bool {
        match (self.points.first(), self.points.last()) {
            (Some(a), Some(b)) if self.points.len() > 2 => {
                (a.point - b.point).norm() <= a.tolerance.max(b.tolerance)
            }
            _ => false,
        }
    }

    fn boxes(&self) -> &LineBoxes {
        self.boxes.get_or_init(|| {
            let mut space = Aabb3::empty();
            let mut uv1 = Aabb2::empty();
            let mut uv2 = Aabb2::empty();
            let mut tol = 0.0f64;
            for p in self.points.iter().chain(&self.vertices) {
                space.include_point(&p.point);
                uv1.include_point(&p.uv1);
                uv2.include_point(&p.uv2);
                tol = tol.max(p.tolerance);
            }
            if !space.is_empty() {
                space.expand(tol);
                uv1.expand(UV_BOX_PAD);
                uv2.expand(UV_BOX_PAD);
            }
            LineBoxes { space, uv1, uv2 }
        })
    }

    /// Box around all points, padded by the largest point tolerance.
    pub fn bounding_box(&self) -> Aabb3 {
        self.boxes().space
    }

    /// Parameter box on surface 1.
    pub fn uv_box_s1(&self) -> Aabb2 {
        self.boxes().uv1
    }

    /// Parameter box on surface 2.
    pub fn uv_box_s2(&self) -> Aabb2 {
        self.boxes().uv2
    }

    /// True if no point of the line can lie at `p`.
    pub fn is_out_box(&self, p: &Point3) -> bool {
        !self.boxes().space.contains(p)
    }

    /// True if no point of the line can have parameters `uv` on surface 1.
    pub fn is_out_surf1_box(&self, uv: &Point2) -> bool {
        is_out_periodic(&self.boxes().uv1, uv, &self.periods1)
    }

    /// True if no point of the line can have parameters `uv` on surface 2.
    pub fn is_out_surf2_box(&self, uv: &Point2) -> bool {
        is_out_periodic(&self.boxes().uv2, uv, &self.periods2)
    }

    /// Reconcile the vertices with the point sequence.
    ///
    /// Each vertex either replaces the line point it coincides with (within
    /// `tol`) or is inserted at its position along the line. Confused
    /// consecutive points are merged, duplicate vertices collapsed, open ends
    /// receive non-genuine vertices, and the vertices end up sorted along the
    /// line. With `has_been_added`, vertex positions are recomputed by
    /// projecting each vertex on the polyline first.
    pub fn compute_vertex_parameters(&mut self, tol: f64, has_been_added: bool) {
        if self.points.is_empty() {
            return;
        }
        if has_been_added {
            for i in 0..self.vertices.len() {
                let x = self.project_on_polyline(&self.vertices[i].point);
                self.vertices[i].param_on_line = x;
            }
        }

        self.dedup_vertices(tol);
        self.sort_vertices();
        self.remove_confused_points(tol);

        // Substitute or insert, in line order.
        for vi in 0..self.vertices.len() {
            let x = self.vertices[vi].param_on_line;
            let n = self.points.len();
            let base = x.floor().max(0.0) as usize;
            let lo = base.saturating_sub(1);
            let hi = (base + 2).min(n - 1);
            let vpoint = self.vertices[vi].point;
            let nearest = (lo..=hi)
                .map(|k| (k, (self.points[k].point - vpoint).norm()))
                .min_by(|a, b| a.1.total_cmp(&b.1));

            match nearest {
                Some((k, d)) if d <= tol.max(self.vertices[vi].tolerance) => {
                    let mut v = self.vertices[vi].clone();
                    self.reframe(&mut v, k);
                    v.param_on_line = k as f64;
                    self.points[k] = v.clone();
                    self.vertices[vi] = v;
                }
                _ => {
                    let at = if x <= 0.0 {
                        0
                    } else if x >= (n - 1) as f64 {
                        n
                    } else {
                        base + 1
                    };
                    let mut v = self.vertices[vi].clone();
                    self.reframe(&mut v, at.min(n - 1));
                    self.points.insert(at, v.clone());
                    for (j, other) in self.vertices.iter_mut().enumerate() {
                        if j != vi && other.param_on_line >= at as f64 {
                            other.param_on_line += 1.0;
                        }
                    }
                    v.param_on_line = at as f64;
                    self.vertices[vi] = v;
                }
            }
        }
        self.renumber_points();

        self.merge_coincident_vertices();
        self.add_end_vertices();
        if self.purger_allowed {
            self.purge_adjacent_vertices();
        }
        self.sort_vertices();
        self.update_end_markers();
        self.touch();

        debug!(
            "wline: {} points, {} vertices after reconciliation",
            self.points.len(),
            self.vertices.len()
        );
    }

    /// Fractional index of the polyline point closest to `p`.
    fn project_on_polyline(&self, p: &Point3) -> f64 {
        if self.points.len() < 2 {
            return 0.0;
        }
        let mut best = (f64::INFINITY, 0.0);
        for (i, w) in self.points.windows(2).enumerate() {
            let a = w[0].point;
            let d = w[1].point - a;
            let len2 = d.norm_squared();
            let t = if len2 > 0.0 {
                ((p - a).dot(&d) / len2).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let dist = (a + d * t - p).norm();
            if dist < best.0 {
                best = (dist, i as f64 + t);
            }
        }
        best.1
    }

    /// Shift the vertex parameters into the period of line point `k`.
    fn reframe(&self, v: &mut IntersectionPoint, k: usize) {
        let reference = &self.points[k];
        v.uv1 = self.periods1.adjust(v.uv1, reference.uv1);
        v.uv2 = self.periods2.adjust(v.uv2, reference.uv2);
    }

    fn sort_vertices(&mut self) {
        let first = self.first.map(|m| self.vertices[m.index].clone());
        let last = self.last.map(|m| self.vertices[m.index].clone());
        self.vertices
            .sort_by(|a, b| a.param_on_line.total_cmp(&b.param_on_line));
        // Keep markers on the same vertices.
        for (slot, v) in [(&mut self.first, first), (&mut self.last, last)] {
            if let (Some(m), Some(v)) = (slot.as_mut(), v) {
                if let Some(i) = self.vertices.iter().position(|w| *w == v) {
                    m.index = i;
                }
            }
        }
    }

    /// Collapse vertices sitting at the same line position and place,
    /// keeping the one with more boundary information.
    fn dedup_vertices(&mut self, tol: f64) {
        let mut i = 0;
        while i < self.vertices.len() {
            let mut j = i + 1;
            while j < self.vertices.len() {
                let (a, b) = (&self.vertices[i], &self.vertices[j]);
                let same_place = (a.param_on_line - b.param_on_line).abs() <= 1e-9
                    && (a.point - b.point).norm() <= tol;
                if !same_place {
                    j += 1;
                    continue;
                }
                let keep_j = info_rank(b) > info_rank(a);
                let (keep, victim) = if keep_j { (j, i) } else { (i, j) };
                let dropped = self.vertices[victim].clone();
                absorb(&mut self.vertices[keep], &dropped);
                self.remove_vertex(victim);
                if keep_j {
                    j = i + 1;
                }
            }
            i += 1;
        }
    }

    /// Merge consecutive line points closer than `tol`.
    fn remove_confused_points(&mut self, tol: f64) {
        let tol2 = tol * tol;
        let mut k = 0;
        while k + 1 < self.points.len() && self.points.len() > 2 {
            let d2 = (self.points[k + 1].point - self.points[k].point).norm_squared();
            if d2 < tol2 {
                let r = if k + 1 == self.points.len() - 1 { k } else { k + 1 };
                self.remove_point(r);
            } else {
                k += 1;
            }
        }
    }

    /// After substitution two vertices may share a line point; keep one.
    fn merge_coincident_vertices(&mut self) {
        self.sort_vertices();
        let mut i = 0;
        while i + 1 < self.vertices.len() {
            if self.vertices[i].param_on_line == self.vertices[i + 1].param_on_line {
                let (keep, victim) =
                    if info_rank(&self.vertices[i + 1]) > info_rank(&self.vertices[i]) {
                        (i + 1, i)
                    } else {
                        (i, i + 1)
                    };
                let dropped = self.vertices[victim].clone();
                absorb(&mut self.vertices[keep], &dropped);
                self.remove_vertex(victim);
            } else {
                i += 1;
            }
        }
    }

    /// Give the open ends of the line non-genuine vertices.
    fn add_end_vertices(&mut self) {
        let n = self.points.len();
        let last_param = (n - 1) as f64;
        if !self.vertices.iter().any(|v| v.param_on_line == 0.0) {
            self.vertices.insert(0, self.points[0].clone());
            for marker in [&mut self.first, &mut self.last].into_iter().flatten() {
                marker.index += 1;
            }
            self.first = Some(EndMarker {
                index: 0,
                genuine: false,
            });
        }
        if !self.vertices.iter().any(|v| v.param_on_line == last_param) {
            self.vertices.push(self.points[n - 1].clone());
            self.last = Some(EndMarker {
                index: self.vertices.len() - 1,
                genuine: false,
            });
        }
    }

    /// Drop an inner one-surface vertex that repeats its neighbour on the
    /// next line point (same arc, same transition kind).
    fn purge_adjacent_vertices(&mut self) {
        self.sort_vertices();
        let n = self.points.len();
        let mut i = 0;
        while i + 1 < self.vertices.len() {
            let (a, b) = (&self.vertices[i], &self.vertices[i + 1]);
            let adjacent = (b.param_on_line - a.param_on_line - 1.0).abs() <= 1e-9;
            let twin = match (single_anchor(a), single_anchor(b)) {
                (Some((sa, xa)), Some((sb, xb))) => {
                    sa == sb
                        && xa.arc == xb.arc
                        && same_kind(&xa.transition.kind, &xb.transition.kind)
                }
                _ => false,
            };
            if adjacent && twin {
                let victim = if b.param_on_line >= (n - 1) as f64 { i } else { i + 1 };
                let at_end = |v: &IntersectionPoint| {
                    v.param_on_line == 0.0 || v.param_on_line == (n - 1) as f64
                };
                if !at_end(&self.vertices[victim]) {
                    self.remove_vertex(victim);
                    continue;
                }
            }
            i += 1;
        }
    }

    fn update_end_markers(&mut self) {
        if self.vertices.is_empty() {
            self.first = None;
            self.last = None;
            return;
        }
        let last_param = (self.points.len() - 1) as f64;
        let genuine = |v: &IntersectionPoint| v.is_on_boundary() || v.vertex.is_some();
        let first_idx = 0;
        let last_idx = self.vertices.len() - 1;
        if self.vertices[first_idx].param_on_line == 0.0 {
            let g = self.first.is_some_and(|m| m.genuine) || genuine(&self.vertices[first_idx]);
            self.first = Some(EndMarker {
                index: first_idx,
                genuine: g,
            });
        }
        if self.vertices[last_idx].param_on_line == last_param {
            let g = self.last.is_some_and(|m| m.genuine) || genuine(&self.vertices[last_idx]);
            self.last = Some(EndMarker {
                index: last_idx,
                genuine: g,
            });
        }
    }

    /// Reverse the traversal direction of the line.
    ///
    /// Points and vertices are reversed, vertex positions mirrored, end
    /// markers swapped and every transition reversed.
    pub fn reverse(&mut self) {
        let n = self.points.len();
        self.points.reverse();
        for p in &mut self.points {
            p.reverse_transition();
        }
        self.renumber_points();
        let nv = self.vertices.len();
        self.vertices.reverse();
        for v in &mut self.vertices {
            v.param_on_line = (n.saturating_sub(1)) as f64 - v.param_on_line;
            v.reverse_transition();
        }
        let flip = |m: Option<EndMarker>| {
            m.map(|m| EndMarker {
                index: nv - 1 - m.index,
                genuine: m.genuine,
            })
        };
        let (first, last) = (flip(self.last), flip(self.first));
        self.first = first;
        self.last = last;
        self.touch();
    }

    /// Drop interior points that lie on the chord of their neighbours.
    ///
    /// Walking from the start, the tube is the line through the last kept
    /// point and the point after it. The middle point goes when the next
    /// point stays within `tol` of that line in space and within the matching
    /// parameter tolerance on both surfaces, and its step ratios agree on
    /// the two surfaces. Ends, vertex points and low-confidence points stay.
    /// Returns the number of points removed.
    pub fn purge(&mut self, tol: f64) -> usize {
        let n = self.points.len();
        if n <= 2 || !self.purger_allowed {
            return 0;
        }
        let mut pinned: Vec<bool> = self.points.iter().map(|p| p.low_confidence).collect();
        pinned[0] = true;
        pinned[n - 1] = true;
        let last = (n - 1) as f64;
        for v in &self.vertices {
            let x = v.param_on_line.clamp(0.0, last);
            pinned[x.floor() as usize] = true;
            pinned[x.ceil() as usize] = true;
        }

        let mut doomed = Vec::new();
        let (mut base, mut axis) = (0, 1);
        for i in 2..n {
            let mid = i - 1;
            let removable = !pinned[mid]
                && self.in_tube(base, axis, i, tol)
                && even_steps(&self.points[base], &self.points[mid], &self.points[i]);
            if removable {
                doomed.push(mid);
            } else {
                base = mid;
                axis = i;
            }
        }
        for &k in doomed.iter().rev() {
            self.remove_point(k);
        }
        if !doomed.is_empty() {
            debug!("wline purge: {} of {} points removed", doomed.len(), n);
        }
        doomed.len()
    }

    /// Whether point `i` lies in the tube around the chord `base -> axis`.
    fn in_tube(&self, base: usize, axis: usize, i: usize, tol: f64) -> bool {
        let (b, a, p) = (&self.points[base], &self.points[axis], &self.points[i]);
        let d = a.point - b.point;
        let len = d.norm();
        if len <= 0.0 {
            return false;
        }
        if (p.point - b.point).cross(&d).norm() / len > tol {
            return false;
        }
        // Parameter tolerance scaled by the local parameter speed.
        [(b.uv1, a.uv1, p.uv1), (b.uv2, a.uv2, p.uv2)]
            .iter()
            .all(|(b, a, p)| {
                let duv = a - b;
                let uv_len = duv.norm();
                uv_len > 0.0 && ssi_math::cross_2d(&(p - b), &duv).abs() / uv_len <= tol * uv_len / len
            })
    }

    /// Text rendering of the line for debugging.
    pub fn dump(&self, mode: DumpMode) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "WLine: {} points, {} vertices, tangent={}, closed={}",
            self.points.len(),
            self.vertices.len(),
            self.tangent,
            self.is_closed()
        );
        for (i, p) in self.points.iter().enumerate() {
            let _ = match mode {
                DumpMode::Full => writeln!(
                    out,
                    "  {:4}  ({:.9}, {:.9}, {:.9})  uv1=({:.9}, {:.9})  uv2=({:.9}, {:.9})",
                    i, p.point.x, p.point.y, p.point.z, p.uv1.x, p.uv1.y, p.uv2.x, p.uv2.y
                ),
                DumpMode::Points => writeln!(
                    out,
                    "  {:4}  ({:.9}, {:.9}, {:.9})",
                    i, p.point.x, p.point.y, p.point.z
                ),
                DumpMode::Surface1 => writeln!(out, "  {:4}  ({:.9}, {:.9})", i, p.uv1.x, p.uv1.y),
                DumpMode::Surface2 => writeln!(out, "  {:4}  ({:.9}, {:.9})", i, p.uv2.x, p.uv2.y),
            };
        }
        for (i, v) in self.vertices.iter().enumerate() {
            let _ = writeln!(
                out,
                "  vertex {} at {:.3}: s1={:?} s2={:?} vertex={:?}",
                i,
                v.param_on_line,
                v.on_s1.map(|a| a.arc),
                v.on_s2.map(|a| a.arc),
                v.vertex
            );
        }
        out
    }
}

/// New fractional index of a vertex after point `r` was removed, `n`
/// points remaining.
fn remap_after_removal(x: f64, r: usize, n: usize) -> f64 {
    let r = r as f64;
    let max = n.saturating_sub(1) as f64;
    let mapped = if x <= r - 1.0 {
        x
    } else if x >= r + 1.0 {
        x - 1.0
    } else if r == 0.0 {
        0.0
    } else {
        // The spans (r-1, r) and (r, r+1) merge into (r-1, r).
        r - 1.0 + (x - (r - 1.0)) / 2.0
    };
    mapped.clamp(0.0, max)
}

/// Step ratios `|mid - base| / |next - mid|` of both parameter spaces agree
/// within 1%, so neither surface is parametrized unevenly along the chord.
fn even_steps(base: &IntersectionPoint, mid: &IntersectionPoint, next: &IntersectionPoint) -> bool {
    let ratio = |b: Point2, m: Point2, n: Point2| {
        let ahead = (n - m).norm_squared();
        (ahead > 0.0).then(|| (m - b).norm_squared() / ahead)
    };
    match (
        ratio(base.uv1, mid.uv1, next.uv1),
        ratio(base.uv2, mid.uv2, next.uv2),
    ) {
        (Some(r1), Some(r2)) => r1.min(r2) / r1.max(r2) > 0.99 * 0.99,
        _ => false,
    }
}

fn is_out_periodic(b: &Aabb2, uv: &Point2, periods: &PeriodPair) -> bool {
    if b.is_empty() {
        return true;
    }
    let axis_out = |value: f64, lo: f64, hi: f64, period: Option<f64>| match period {
        Some(p) if hi - lo < p => {
            let w = wrap_into(value, lo, p);
            w > hi
        }
        Some(_) => false,
        None => value < lo || value > hi,
    };
    axis_out(uv.x, b.min.x, b.max.x, periods.u) || axis_out(uv.y, b.min.y, b.max.y, periods.v)
}

/// How much boundary information a vertex carries.
fn info_rank(v: &IntersectionPoint) -> usize {
    v.on_s1.is_some() as usize + v.on_s2.is_some() as usize + v.vertex.is_some() as usize
}

/// Copy the anchors of `other` that `v` lacks.
fn absorb(v: &mut IntersectionPoint, other: &IntersectionPoint) {
    if v.on_s1.is_none() {
        v.on_s1 = other.on_s1;
    }
    if v.on_s2.is_none() {
        v.on_s2 = other.on_s2;
    }
    if v.vertex.is_none() {
        v.vertex = other.vertex;
    }
}

fn single_anchor(v: &IntersectionPoint) -> Option<(u8, &BoundaryAnchor)> {
    match (&v.on_s1, &v.on_s2) {
        (Some(a), None) => Some((1, a)),
        (None, Some(a)) => Some((2, a)),
        _ => None,
    }
}

fn same_kind(a: &TransitionKind, b: &TransitionKind) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}
