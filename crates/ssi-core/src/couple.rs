//! Triangle-pair coupling search between two surface meshes.
//!
//! Triangles of mesh A are indexed in a [`TriangleBvh`]; every triangle of
//! mesh B queries it with its own box and the exact triangle-triangle test
//! runs on the survivors. Mesh-B triangles are visited in ascending order and
//! the BVH returns ascending mesh-A indices, so the candidate list is the same
//! whether the search runs on the rayon pool or not.

use log::debug;
use rayon::prelude::*;
use ssi_math::{Point2, Point3};

use crate::bvh::TriangleBvh;
use crate::mesh::SurfaceMesh;
use crate::settings::IntersectionSettings;
use crate::tri_tri::{intersect_triangles, TriTriContact};

/// A coarse point with parameter seeds on both surfaces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeedPoint {
    /// 3D position.
    pub point: Point3,
    /// Seed parameters on surface 1 (mesh A).
    pub uv1: Point2,
    /// Seed parameters on surface 2 (mesh B).
    pub uv2: Point2,
}

/// What a candidate pair contributes downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Contact {
    /// The triangles cross along a segment (possibly of zero length).
    Segment {
        /// First endpoint.
        start: SeedPoint,
        /// Second endpoint.
        end: SeedPoint,
    },
    /// The triangles are coincident over an area: a tangent candidate.
    Tangent {
        /// Corners of the overlap polygon.
        points: Vec<SeedPoint>,
    },
    /// Only the circumscribed variants meet; the surfaces may touch nearby.
    Near {
        /// Midpoint of the circumscribed contact, seeded on the plain triangles.
        seed: SeedPoint,
    },
}

/// One candidate triangle pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePair {
    /// Triangle of mesh A.
    pub tri_a: usize,
    /// Triangle of mesh B.
    pub tri_b: usize,
    /// Contact found between them.
    pub contact: Contact,
}

/// Result of [`find_candidates`].
#[derive(Debug, Clone, Default)]
pub struct CouplingOutput {
    /// Candidate pairs in (mesh-B, mesh-A) ascending order.
    pub pairs: Vec<CandidatePair>,
    /// Pairs accepted only through the circumscribed meshes.
    pub circumscribed_pairs: usize,
    /// Box-overlapping pairs that went through the exact test.
    pub tested_pairs: usize,
}

/// Find the candidate triangle pairs of two meshes.
pub fn find_candidates(
    mesh_a: &SurfaceMesh,
    mesh_b: &SurfaceMesh,
    settings: &IntersectionSettings,
) -> CouplingOutput {
    if mesh_a.is_empty() || mesh_b.is_empty() || !mesh_a.bounds().overlaps(mesh_b.bounds()) {
        return CouplingOutput::default();
    }
    let pad = settings.tolerance;
    let bvh = TriangleBvh::build(
        (0..mesh_a.triangles.len())
            .map(|t| (t, mesh_a.triangle_box(t, pad)))
            .collect(),
    );

    let visit = |tb: usize| -> (Vec<CandidatePair>, usize) {
        let query = mesh_b.triangle_box(tb, pad);
        let hits = bvh.query(&query);
        let tested = hits.len();
        let pairs = hits
            .into_iter()
            .filter_map(|ta| couple(mesh_a, mesh_b, ta, tb, settings))
            .collect();
        (pairs, tested)
    };

    let per_triangle: Vec<(Vec<CandidatePair>, usize)> = if settings.parallel {
        (0..mesh_b.triangles.len()).into_par_iter().map(visit).collect()
    } else {
        (0..mesh_b.triangles.len()).map(visit).collect()
    };

    let mut out = CouplingOutput::default();
    for (pairs, tested) in per_triangle {
        out.tested_pairs += tested;
        out.pairs.extend(pairs);
    }
    out.circumscribed_pairs = out
        .pairs
        .iter()
        .filter(|p| matches!(p.contact, Contact::Near { .. }))
        .count();

    debug!(
        "coupling: {} x {} triangles, {} box hits, {} candidates ({} circumscribed)",
        mesh_a.triangles.len(),
        mesh_b.triangles.len(),
        out.tested_pairs,
        out.pairs.len(),
        out.circumscribed_pairs
    );
    out
}

fn couple(
    mesh_a: &SurfaceMesh,
    mesh_b: &SurfaceMesh,
    ta: usize,
    tb: usize,
    settings: &IntersectionSettings,
) -> Option<CandidatePair> {
    let eps = settings.tolerance;
    let pa = mesh_a.triangle_points(ta);
    let pb = mesh_b.triangle_points(tb);
    let seed = |p: Point3| SeedPoint {
        point: p,
        uv1: mesh_a.uv_at(ta, &p),
        uv2: mesh_b.uv_at(tb, &p),
    };

    let contact = match intersect_triangles(&pa, &pb, eps) {
        TriTriContact::Segment(p, q) => Contact::Segment {
            start: seed(p),
            end: seed(q),
        },
        TriTriContact::Coplanar(poly) => Contact::Tangent {
            points: poly.into_iter().map(seed).collect(),
        },
        TriTriContact::Disjoint if settings.use_circumscribed => {
            let ca = mesh_a.circumscribed_points(ta).unwrap_or(pa);
            let cb = mesh_b.circumscribed_points(tb).unwrap_or(pb);
            if ca == pa && cb == pb {
                return None;
            }
            let mid = match intersect_triangles(&ca, &cb, eps) {
                TriTriContact::Segment(p, q) => Point3::from((p.coords + q.coords) * 0.5),
                TriTriContact::Coplanar(poly) => centroid(&poly)?,
                TriTriContact::Disjoint => return None,
            };
            Contact::Near { seed: seed(mid) }
        }
        TriTriContact::Disjoint => return None,
    };
    Some(CandidatePair {
        tri_a: ta,
        tri_b: tb,
        contact,
    })
}

fn centroid(points: &[Point3]) -> Option<Point3> {
    if points.is_empty() {
        return None;
    }
    let sum = points
        .iter()
        .fold(ssi_math::Vec3::zeros(), |acc, p| acc + p.coords);
    Some(Point3::from(sum / points.len() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshBuilder;
    use approx::assert_abs_diff_eq;
    use ssi_geom::{Plane, SphereSurface, Surface};
    use ssi_math::Vec3;

    fn plane_mesh(plane: &Plane, half: f64) -> SurfaceMesh {
        MeshBuilder::new(plane, (-half, half), (-half, half))
            .samples(5, 5)
            .build()
    }

    #[test]
    fn test_crossing_planes_give_segments_on_the_line() {
        let a = Plane::xy();
        let b = Plane::from_normal(Point3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 1.0));
        let ma = plane_mesh(&a, 1.0);
        let mb = plane_mesh(&b, 2.0);
        let out = find_candidates(&ma, &mb, &IntersectionSettings::default());
        assert!(!out.pairs.is_empty());
        for pair in &out.pairs {
            let Contact::Segment { start, end } = &pair.contact else {
                panic!("unexpected contact {:?}", pair.contact);
            };
            for s in [start, end] {
                assert_abs_diff_eq!(s.point.y, 0.0, epsilon = 1e-9);
                assert_abs_diff_eq!(s.point.z, 0.0, epsilon = 1e-9);
                // Seeds evaluate back onto the point (planes are exact).
                assert_abs_diff_eq!((a.evaluate(s.uv1) - s.point).norm(), 0.0, epsilon = 1e-9);
                assert_abs_diff_eq!((b.evaluate(s.uv2) - s.point).norm(), 0.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_parallel_and_serial_agree() {
        let a = SphereSurface::new(1.0);
        let b = SphereSurface::with_center(Point3::new(1.2, 0.0, 0.0), 1.0);
        let ((au, av), (bu, bv)) = (a.domain(), b.domain());
        let ma = MeshBuilder::new(&a, au, av).samples(13, 9).build();
        let mb = MeshBuilder::new(&b, bu, bv).samples(13, 9).build();
        let parallel = find_candidates(&ma, &mb, &IntersectionSettings::default());
        let serial = find_candidates(
            &ma,
            &mb,
            &IntersectionSettings {
                parallel: false,
                ..Default::default()
            },
        );
        assert!(!parallel.pairs.is_empty());
        assert_eq!(parallel.pairs, serial.pairs);
        let keys: Vec<_> = parallel.pairs.iter().map(|p| (p.tri_b, p.tri_a)).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_coincident_planes_are_tangent_candidates() {
        let a = Plane::xy();
        let ma = plane_mesh(&a, 1.0);
        let mb = plane_mesh(&a, 1.0);
        let out = find_candidates(&ma, &mb, &IntersectionSettings::default());
        assert!(!out.pairs.is_empty());
        assert!(out
            .pairs
            .iter()
            .all(|p| matches!(p.contact, Contact::Tangent { .. })));
    }

    #[test]
    fn test_circumscribed_catches_near_tangency() {
        // Plane slightly below the top of a coarse sphere mesh: the plain
        // triangles stay under it, the circumscribed ones poke through.
        let sphere = SphereSurface::new(1.0);
        let (su, sv) = sphere.domain();
        let ms = MeshBuilder::new(&sphere, su, sv)
            .samples(9, 9)
            .circumscribed(1.5)
            .build();
        let top = ms
            .vertices
            .iter()
            .filter(|v| v.valid)
            .map(|v| v.point.z)
            .fold(f64::MIN, f64::max);
        assert_abs_diff_eq!(top, 1.0, epsilon = 1e-12);

        let plane = Plane::from_normal(Point3::new(0.0, 0.0, 1.0 + 1e-4), Vec3::z());
        let mp = plane_mesh(&plane, 2.0);
        let settings = IntersectionSettings::default();
        let out = find_candidates(&ms, &mp, &settings);
        assert!(out.circumscribed_pairs > 0);
        assert!(out
            .pairs
            .iter()
            .all(|p| matches!(p.contact, Contact::Near { .. })));

        let without = find_candidates(
            &ms,
            &mp,
            &IntersectionSettings {
                use_circumscribed: false,
                ..settings
            },
        );
        assert!(without.pairs.is_empty());
    }

    #[test]
    fn test_disjoint_meshes() {
        let a = SphereSurface::new(1.0);
        let b = SphereSurface::with_center(Point3::new(5.0, 0.0, 0.0), 1.0);
        let ((au, av), (bu, bv)) = (a.domain(), b.domain());
        let ma = MeshBuilder::new(&a, au, av).samples(9, 9).build();
        let mb = MeshBuilder::new(&b, bu, bv).samples(9, 9).build();
        let out = find_candidates(&ma, &mb, &IntersectionSettings::default());
        assert!(out.pairs.is_empty());
        assert_eq!(out.tested_pairs, 0);
    }
}
