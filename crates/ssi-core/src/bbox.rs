//! Axis-aligned bounding boxes in 3D and in parameter space.
//!
//! Used as a broadphase filter for triangle pairs and as the cached
//! containment boxes of a [`crate::WLine`].

use ssi_math::{Point2, Point3, Vec3};

/// Axis-aligned bounding box in 3D.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb3 {
    /// Minimum corner.
    pub min: Point3,
    /// Maximum corner.
    pub max: Point3,
}

impl Aabb3 {
    /// Create an AABB from min and max corners.
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// Create an empty (inverted) AABB suitable for expansion.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Smallest box containing all `points`.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.include_point(p);
        }
        aabb
    }

    /// True when no point has been included.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this AABB to include a point.
    pub fn include_point(&mut self, p: &Point3) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    /// Expand this AABB to include another box.
    pub fn include_box(&mut self, other: &Aabb3) {
        if other.is_empty() {
            return;
        }
        self.include_point(&other.min);
        self.include_point(&other.max);
    }

    /// Test if two AABBs overlap (touching counts as overlap).
    pub fn overlaps(&self, other: &Aabb3) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Common part of two boxes, `None` when they are disjoint.
    pub fn intersection(&self, other: &Aabb3) -> Option<Aabb3> {
        if self.is_empty() || other.is_empty() || !self.overlaps(other) {
            return None;
        }
        Some(Aabb3::new(
            Point3::new(
                self.min.x.max(other.min.x),
                self.min.y.max(other.min.y),
                self.min.z.max(other.min.z),
            ),
            Point3::new(
                self.max.x.min(other.max.x),
                self.max.y.min(other.max.y),
                self.max.z.min(other.max.z),
            ),
        ))
    }

    /// Test if a point lies inside the box (boundary included).
    pub fn contains(&self, p: &Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Expand the AABB by a tolerance in all directions.
    pub fn expand(&mut self, tol: f64) {
        self.min.x -= tol;
        self.min.y -= tol;
        self.min.z -= tol;
        self.max.x += tol;
        self.max.y += tol;
        self.max.z += tol;
    }

    /// Copy of the box expanded by `tol`.
    pub fn expanded(mut self, tol: f64) -> Self {
        self.expand(tol);
        self
    }

    /// Box extent along each axis.
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Length of the box diagonal (0 for an empty box).
    pub fn diagonal(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.extent().norm()
        }
    }

    /// Center of the box.
    pub fn centroid(&self) -> Point3 {
        Point3::from((self.min.coords + self.max.coords) / 2.0)
    }

    /// Surface area of the box.
    pub fn surface_area(&self) -> f64 {
        let d = self.extent();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }
}

/// Axis-aligned box in a surface's parameter space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb2 {
    /// Minimum corner.
    pub min: Point2,
    /// Maximum corner.
    pub max: Point2,
}

impl Aabb2 {
    /// Create an empty (inverted) box suitable for expansion.
    pub fn empty() -> Self {
        Self {
            min: Point2::new(f64::INFINITY, f64::INFINITY),
            max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// True when no point has been included.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    /// Expand the box to include a point.
    pub fn include_point(&mut self, p: &Point2) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    /// Expand the box by `tol` in both directions.
    pub fn expand(&mut self, tol: f64) {
        self.min.x -= tol;
        self.min.y -= tol;
        self.max.x += tol;
        self.max.y += tol;
    }

    /// Test if a point lies inside the box (boundary included).
    pub fn contains(&self, p: &Point2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_and_touch() {
        let a = Aabb3::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let b = Aabb3::new(Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0));
        let c = Aabb3::new(Point3::new(1.5, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.expanded(0.6).overlaps(&c));
    }

    #[test]
    fn test_intersection() {
        let a = Aabb3::new(Point3::origin(), Point3::new(2.0, 2.0, 2.0));
        let b = Aabb3::new(Point3::new(1.0, -1.0, 2.0), Point3::new(3.0, 1.0, 5.0));
        let common = a.intersection(&b).unwrap();
        assert_eq!(common.min, Point3::new(1.0, 0.0, 2.0));
        assert_eq!(common.max, Point3::new(2.0, 1.0, 2.0));
        assert_eq!(common.extent().z, 0.0);

        let far = Aabb3::new(Point3::new(5.0, 5.0, 5.0), Point3::new(6.0, 6.0, 6.0));
        assert!(a.intersection(&far).is_none());
        assert!(a.intersection(&Aabb3::empty()).is_none());
    }

    #[test]
    fn test_empty_box() {
        let mut a = Aabb3::empty();
        assert!(a.is_empty());
        assert_eq!(a.diagonal(), 0.0);
        a.include_box(&Aabb3::empty());
        assert!(a.is_empty());
        a.include_point(&Point3::new(1.0, 2.0, 3.0));
        assert!(!a.is_empty());
        assert!(a.contains(&Point3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_from_points_metrics() {
        let pts = [Point3::origin(), Point3::new(2.0, 4.0, 4.0)];
        let a = Aabb3::from_points(pts.iter());
        assert_eq!(a.diagonal(), 6.0);
        assert_eq!(a.centroid(), Point3::new(1.0, 2.0, 2.0));
        assert_eq!(a.surface_area(), 2.0 * (8.0 + 16.0 + 8.0));
    }

    #[test]
    fn test_aabb2() {
        let mut b = Aabb2::empty();
        b.include_point(&Point2::new(0.0, 0.0));
        b.include_point(&Point2::new(1.0, 2.0));
        assert!(b.contains(&Point2::new(0.5, 1.0)));
        assert!(!b.contains(&Point2::new(1.1, 1.0)));
        b.expand(0.2);
        assert!(b.contains(&Point2::new(1.1, 1.0)));
    }
}
