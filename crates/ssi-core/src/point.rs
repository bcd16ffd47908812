//! Classified intersection points.

use ssi_geom::{ArcRef, Surface, VertexRef};
use ssi_math::{Point2, Point3};

use crate::transition::Transition;

/// One of the two surfaces of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceSide {
    /// The first surface.
    S1,
    /// The second surface.
    S2,
}

/// A point lying on a trim-boundary arc of one surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryAnchor {
    /// Arc of [`Surface::trim_loops`].
    pub arc: ArcRef,
    /// Parameter on the arc.
    pub param: f64,
    /// How the line crosses the arc, against the arc's own orientation.
    pub transition: Transition,
}

/// A classified point of an intersection line.
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionPoint {
    /// 3D position.
    pub point: Point3,
    /// Parameters on surface 1.
    pub uv1: Point2,
    /// Parameters on surface 2.
    pub uv2: Point2,
    /// Local positional uncertainty.
    pub tolerance: f64,
    /// The surfaces are tangent here.
    pub is_tangent: bool,
    /// Refinement stopped before reaching the tolerance.
    pub low_confidence: bool,
    /// Position along the owning line (index-based, fractional between points).
    pub param_on_line: f64,
    /// Line transition with respect to surface 1.
    pub transition_s1: Transition,
    /// Line transition with respect to surface 2.
    pub transition_s2: Transition,
    /// Boundary anchor on surface 1.
    pub on_s1: Option<BoundaryAnchor>,
    /// Boundary anchor on surface 2.
    pub on_s2: Option<BoundaryAnchor>,
    /// Caller vertex this point coincides with.
    pub vertex: Option<VertexRef>,
}

impl IntersectionPoint {
    /// Unclassified point.
    pub fn new(point: Point3, uv1: Point2, uv2: Point2, tolerance: f64) -> Self {
        Self {
            point,
            uv1,
            uv2,
            tolerance,
            is_tangent: false,
            low_confidence: false,
            param_on_line: 0.0,
            transition_s1: Transition::undecided(),
            transition_s2: Transition::undecided(),
            on_s1: None,
            on_s2: None,
            vertex: None,
        }
    }

    /// Parameters `(u1, v1, u2, v2)`.
    pub fn parameters(&self) -> (f64, f64, f64, f64) {
        (self.uv1.x, self.uv1.y, self.uv2.x, self.uv2.y)
    }

    /// Parameters on one surface.
    pub fn uv(&self, side: SurfaceSide) -> Point2 {
        match side {
            SurfaceSide::S1 => self.uv1,
            SurfaceSide::S2 => self.uv2,
        }
    }

    /// Boundary anchor on one surface.
    pub fn anchor(&self, side: SurfaceSide) -> Option<&BoundaryAnchor> {
        match side {
            SurfaceSide::S1 => self.on_s1.as_ref(),
            SurfaceSide::S2 => self.on_s2.as_ref(),
        }
    }

    /// Anchor the point on a boundary arc of one surface.
    pub fn set_arc(&mut self, side: SurfaceSide, anchor: BoundaryAnchor) {
        match side {
            SurfaceSide::S1 => self.on_s1 = Some(anchor),
            SurfaceSide::S2 => self.on_s2 = Some(anchor),
        }
    }

    /// True if the point lies on a boundary arc of either surface.
    pub fn is_on_boundary(&self) -> bool {
        self.on_s1.is_some() || self.on_s2.is_some()
    }

    /// True if the point lies on boundary arcs of both surfaces.
    pub fn is_on_both_boundaries(&self) -> bool {
        self.on_s1.is_some() && self.on_s2.is_some()
    }

    /// Distance between the two surface evaluations.
    pub fn gap(&self, s1: &dyn Surface, s2: &dyn Surface) -> f64 {
        (s1.evaluate(self.uv1) - s2.evaluate(self.uv2)).norm()
    }

    /// Flip every transition for backward traversal of the line.
    pub fn reverse_transition(&mut self) {
        self.transition_s1.reverse();
        self.transition_s2.reverse();
        for anchor in [&mut self.on_s1, &mut self.on_s2].into_iter().flatten() {
            anchor.transition.reverse();
        }
    }

    /// The same point seen from the query with the surfaces swapped.
    pub fn swapped(&self) -> Self {
        Self {
            uv1: self.uv2,
            uv2: self.uv1,
            transition_s1: self.transition_s2,
            transition_s2: self.transition_s1,
            on_s1: self.on_s2,
            on_s2: self.on_s1,
            ..self.clone()
        }
    }
}
