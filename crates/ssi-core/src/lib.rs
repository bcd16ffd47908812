#![warn(missing_docs)]

//! Surface-surface intersection for the ssi kernel.
//!
//! Computes the intersection of two parametric surfaces as walking lines
//! (ordered point sequences carrying parameters on both surfaces), isolated
//! contact points and tangent zones.
//!
//! The pipeline has 5 stages:
//! 1. **Meshing**: adaptive triangulation of each surface's parameter domain
//! 2. **Coupling**: BVH broadphase plus exact triangle-triangle tests
//! 3. **Chaining**: segment endpoints merged and walked into section lines
//! 4. **Refinement**: Newton projection of every point onto both surfaces,
//!    boundary location and transition classification
//! 5. **Line assembly**: vertex parameters, end markers and boxes on each
//!    [`WLine`], then free ends joined and collinear points purged
//!
//! Before meshing, each parameter rectangle is cut down to the cells that
//! reach the common bounding box of the two surfaces.
//!
//! Queries are independent; an [`Intersector`] can be shared across threads
//! and each query fans out on the rayon pool when `parallel` is set.

pub mod bbox;
pub mod bvh;
pub mod couple;
mod engine;
pub mod error;
pub mod join;
pub mod mesh;
pub mod point;
pub mod section;
pub mod settings;
pub mod transition;
pub mod tri_tri;
pub mod walk;
pub mod wline;

// Re-export public API
pub use engine::{intersect, Intersection, IntersectionStatus, Intersector};
pub use error::{Result, SsiError, Stage};
pub use point::{BoundaryAnchor, IntersectionPoint, SurfaceSide};
pub use section::TangentZone;
pub use settings::{IntersectionSettings, ParamRange, SampleHints};
pub use transition::{TouchSide, Transition, TransitionKind};
pub use wline::{CreationWay, DumpMode, EndMarker, WLine};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ssi_geom::{LoopOrientation, Plane, SphereSurface, Surface, TrimLoop, TrimmedSurface};
    use ssi_math::{Point2, Point3, Vec3};
    use std::sync::atomic::AtomicBool;

    /// Distance from `p` to the nearest point of `line`.
    fn distance_to_line(line: &WLine, p: &Point3) -> f64 {
        line.points()
            .iter()
            .map(|q| (q.point - p).norm())
            .fold(f64::INFINITY, f64::min)
    }

    fn assert_on_both(p: &IntersectionPoint, s1: &dyn Surface, s2: &dyn Surface, tol: f64) {
        assert!(
            (s1.evaluate(p.uv1) - p.point).norm() <= tol,
            "point {:?} off surface 1",
            p.point
        );
        assert!(
            (s2.evaluate(p.uv2) - p.point).norm() <= tol,
            "point {:?} off surface 2",
            p.point
        );
    }

    #[test]
    fn test_two_planes_at_an_angle() {
        let a = Plane::xy();
        let b = Plane::from_normal(Point3::origin(), Vec3::new(0.0, 1.0, 1.0));
        let result = intersect(&a, &b, 1e-6).unwrap();

        assert_eq!(result.lines.len(), 1);
        assert!(result.isolated_points.is_empty());
        assert!(result.tangent_zones.is_empty());
        assert!(result.status.is_clean());

        let line = &result.lines[0];
        assert!(!line.is_closed());
        assert!(!line.is_tangent_line());
        // Collinear interior points are purged down to the two ends.
        assert_eq!(line.nb_pnts(), 2);
        let first = line.point(0).transition_s1;
        assert!(first.is_crossing());
        for p in line.points() {
            assert_abs_diff_eq!(p.point.y, 0.0, epsilon = 1e-6);
            assert_abs_diff_eq!(p.point.z, 0.0, epsilon = 1e-6);
            assert_eq!(p.transition_s1, first);
            assert_on_both(p, &a, &b, 1e-6);
        }
        // Unbounded planes are sampled over the clamp window.
        let xs: Vec<f64> = line.points().iter().map(|p| p.point.x).collect();
        let (lo, hi) = xs
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)));
        assert_abs_diff_eq!(lo, -100.0, epsilon = 1e-6);
        assert_abs_diff_eq!(hi, 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sample_hints_restrict_the_region() {
        let a = Plane::xy();
        let b = Plane::from_normal(Point3::origin(), Vec3::new(0.0, 1.0, 1.0));
        let hints = SampleHints {
            uv1: Some(ParamRange::new((-1.0, 1.0), (-1.0, 1.0))),
            samples1: Some((5, 5)),
            ..Default::default()
        };
        let result = Intersector::new(IntersectionSettings::default())
            .intersect(&a, &b, &hints)
            .unwrap();
        assert_eq!(result.lines.len(), 1);
        for p in result.lines[0].points() {
            assert!(p.point.x.abs() <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn test_plane_tangent_to_sphere() {
        let sphere = SphereSurface::new(1.0);
        let plane = Plane::from_normal(Point3::new(0.0, 0.0, 1.0), Vec3::z());
        let result = intersect(&sphere, &plane, 1e-6).unwrap();

        assert!(result.lines.is_empty());
        assert!(result.tangent_zones.is_empty());
        assert_eq!(result.isolated_points.len(), 1);
        let p = &result.isolated_points[0];
        assert!(p.is_tangent);
        assert_abs_diff_eq!((p.point - Point3::new(0.0, 0.0, 1.0)).norm(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_concentric_spheres_do_not_meet() {
        let inner = SphereSurface::new(1.0);
        let outer = SphereSurface::new(2.0);
        let result = intersect(&inner, &outer, 1e-6).unwrap();
        assert!(result.is_empty());
        assert!(!result.status.has_degenerate_regions());
        assert_eq!(result.status.low_confidence_points, 0);
    }

    #[test]
    fn test_two_spheres_meet_in_a_circle() {
        let a = SphereSurface::new(10.0);
        let b = SphereSurface::with_center(Point3::new(15.0, 0.0, 0.0), 10.0);
        let result = intersect(&a, &b, 1e-6).unwrap();

        assert_eq!(result.lines.len(), 1);
        assert!(result.isolated_points.is_empty());
        let line = &result.lines[0];
        assert!(line.is_closed());
        assert!(line.nb_pnts() > 8);
        for p in line.points() {
            assert_abs_diff_eq!(p.point.coords.norm(), 10.0, epsilon = 1e-5);
            assert_abs_diff_eq!((p.point - Point3::new(15.0, 0.0, 0.0)).norm(), 10.0, epsilon = 1e-5);
            assert_abs_diff_eq!(p.point.x, 7.5, epsilon = 1e-5);
            assert_on_both(p, &a, &b, 1e-5);
        }
        // Closed lines carry no genuine ends.
        assert!(line.first_marker().map_or(true, |m| !m.genuine));
    }

    #[test]
    fn test_swapping_surfaces_swaps_parameters() {
        let a = SphereSurface::new(10.0);
        let b = SphereSurface::with_center(Point3::new(15.0, 0.0, 0.0), 10.0);
        let forward = intersect(&a, &b, 1e-6).unwrap();
        let backward = intersect(&b, &a, 1e-6).unwrap();

        assert_eq!(forward.lines.len(), backward.lines.len());
        let (f, r) = (&forward.lines[0], &backward.lines[0]);
        assert!(r.is_closed());
        assert!(f.nb_pnts().abs_diff(r.nb_pnts()) <= 2);
        for q in r.points() {
            assert_on_both(q, &b, &a, 1e-5);
            assert!(distance_to_line(f, &q.point) < 1e-3);
        }
    }

    #[test]
    fn test_swapping_planes_swaps_transitions() {
        let a = Plane::xy();
        let b = Plane::from_normal(Point3::origin(), Vec3::new(0.0, 1.0, 1.0));
        let forward = intersect(&a, &b, 1e-6).unwrap();
        let backward = intersect(&b, &a, 1e-6).unwrap();
        assert_eq!(forward.lines.len(), 1);
        assert_eq!(backward.lines.len(), 1);

        let (f, r) = (&forward.lines[0], &backward.lines[0]);
        let chord = |l: &WLine| l.point(l.nb_pnts() - 1).point - l.point(0).point;
        let same_way = chord(f).dot(&chord(r)) > 0.0;
        let (ft, rt) = (f.point(0), r.point(0));
        if same_way {
            assert_eq!(ft.transition_s2, rt.transition_s1);
            assert_eq!(ft.transition_s1, rt.transition_s2);
        } else {
            assert_eq!(ft.transition_s2, rt.transition_s1.reversed());
            assert_eq!(ft.transition_s1, rt.transition_s2.reversed());
        }
        assert!(rt.transition_s1.is_crossing());
    }

    #[test]
    fn test_open_line_never_doubles_back() {
        let sphere = SphereSurface::new(1.0);
        let plane = Plane::from_normal(Point3::new(0.0, 0.0, 0.3), Vec3::z());
        let hints = SampleHints {
            uv1: Some(ParamRange::new(
                (0.5, 2.5),
                (-std::f64::consts::FRAC_PI_2, std::f64::consts::FRAC_PI_2),
            )),
            ..Default::default()
        };
        let result = Intersector::new(IntersectionSettings::default())
            .intersect(&sphere, &plane, &hints)
            .unwrap();

        assert_eq!(result.lines.len(), 1);
        let line = &result.lines[0];
        assert!(!line.is_closed());
        assert!(line.nb_pnts() > 3);
        let pts = line.points();
        for w in pts.windows(3) {
            let (c0, c1) = (w[1].point - w[0].point, w[2].point - w[1].point);
            assert!(c0.dot(&c1) >= 0.0, "line doubles back at {:?}", w[1].point);
        }
        for p in pts {
            assert_abs_diff_eq!(p.point.z, 0.3, epsilon = 1e-5);
            assert_on_both(p, &sphere, &plane, 1e-5);
        }
    }

    #[test]
    fn test_common_box_keeps_the_result() {
        let a = SphereSurface::new(10.0);
        let b = SphereSurface::with_center(Point3::new(15.0, 0.0, 0.0), 10.0);
        let full = Intersector::new(IntersectionSettings {
            restrict_to_common_box: false,
            ..Default::default()
        })
        .intersect(&a, &b, &SampleHints::default())
        .unwrap();
        let cut = intersect(&a, &b, 1e-6).unwrap();

        assert_eq!(full.lines.len(), 1);
        assert_eq!(cut.lines.len(), 1);
        assert!(full.lines[0].is_closed());
        assert!(cut.lines[0].is_closed());
        for q in cut.lines[0].points() {
            assert_on_both(q, &a, &b, 1e-5);
            assert!(distance_to_line(&full.lines[0], &q.point) < 1e-3);
        }
    }

    #[test]
    fn test_disjoint_boxes_return_early() {
        let a = SphereSurface::new(1.0);
        let b = SphereSurface::with_center(Point3::new(5.0, 0.0, 0.0), 1.0);
        let result = intersect(&a, &b, 1e-6).unwrap();
        assert!(result.is_empty());
        assert!(result.status.is_clean());
    }

    #[test]
    fn test_purge_can_be_disabled() {
        let a = Plane::xy();
        let b = Plane::from_normal(Point3::origin(), Vec3::new(0.0, 1.0, 1.0));
        let result = Intersector::new(IntersectionSettings {
            purge_lines: false,
            ..Default::default()
        })
        .intersect(&a, &b, &SampleHints::default())
        .unwrap();
        assert_eq!(result.lines.len(), 1);
        assert!(result.lines[0].nb_pnts() > 2);
    }

    #[test]
    fn test_trimmed_plane_gets_boundary_vertices() {
        let base = Plane::xy();
        let trimmed = TrimmedSurface::new(
            &base,
            vec![
                TrimLoop::rectangle(-2.0, 2.0, -2.0, 2.0, LoopOrientation::Outer, 0),
                TrimLoop::circle(Point2::origin(), 0.5, LoopOrientation::Inner),
            ],
        );
        let cutter = Plane::xz();
        let result = intersect(&trimmed, &cutter, 1e-6).unwrap();

        assert_eq!(result.lines.len(), 2);
        for line in &result.lines {
            let anchored = line
                .vertices()
                .iter()
                .filter(|v| v.on_s1.is_some())
                .count();
            assert_eq!(anchored, 2);
            assert!(line.first_marker().is_some_and(|m| m.genuine));
            assert!(line.last_marker().is_some_and(|m| m.genuine));
            for p in line.points() {
                assert!(p.point.x.abs() >= 0.5 - 1e-6 && p.point.x.abs() <= 2.0 + 1e-6);
            }
        }
    }

    #[test]
    fn test_coincident_planes_form_a_tangent_zone() {
        let a = Plane::xy();
        let result = intersect(&a, &a, 1e-6).unwrap();
        assert!(result.lines.is_empty());
        assert_eq!(result.tangent_zones.len(), 1);
        assert!(result.tangent_zones[0].points.len() >= 4);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let a = Plane::xy();
        let hints = SampleHints {
            uv2: Some(ParamRange::new((1.0, -1.0), (0.0, 1.0))),
            ..Default::default()
        };
        let err = Intersector::new(IntersectionSettings::default())
            .intersect(&a, &a, &hints)
            .unwrap_err();
        assert!(matches!(err, SsiError::InvalidBounds { surface: 2, .. }));

        let hints = SampleHints {
            uv1: Some(ParamRange::new((0.0, f64::NAN), (0.0, 1.0))),
            ..Default::default()
        };
        let err = Intersector::new(IntersectionSettings::default())
            .intersect(&a, &a, &hints)
            .unwrap_err();
        assert!(matches!(err, SsiError::InvalidBounds { surface: 1, .. }));
    }

    #[test]
    fn test_invalid_tolerance_rejected() {
        let a = Plane::xy();
        assert!(matches!(
            intersect(&a, &a, 0.0),
            Err(SsiError::InvalidTolerance(_))
        ));
    }

    #[test]
    fn test_cancelled_query() {
        let a = SphereSurface::new(1.0);
        let b = SphereSurface::with_center(Point3::new(1.0, 0.0, 0.0), 1.0);
        let flag = AtomicBool::new(true);
        let err = Intersector::new(IntersectionSettings::default())
            .with_cancel(&flag)
            .intersect(&a, &b, &SampleHints::default())
            .unwrap_err();
        assert!(matches!(
            err,
            SsiError::Cancelled {
                stage: Stage::MeshBuild
            }
        ));

        let idle = AtomicBool::new(false);
        let ok = Intersector::new(IntersectionSettings::default())
            .with_cancel(&idle)
            .intersect(&a, &b, &SampleHints::default());
        assert!(ok.is_ok());
    }

    #[test]
    fn test_serial_matches_parallel() {
        let a = SphereSurface::new(1.0);
        let b = SphereSurface::with_center(Point3::new(1.2, 0.0, 0.0), 1.0);
        let parallel = intersect(&a, &b, 1e-6).unwrap();
        let serial = Intersector::new(IntersectionSettings {
            parallel: false,
            ..Default::default()
        })
        .intersect(&a, &b, &SampleHints::default())
        .unwrap();
        assert_eq!(parallel.lines.len(), serial.lines.len());
        for (p, s) in parallel.lines.iter().zip(&serial.lines) {
            assert_eq!(p.nb_pnts(), s.nb_pnts());
            for (x, y) in p.points().iter().zip(s.points()) {
                assert_eq!(x.point, y.point);
            }
        }
    }
}
