//! Exact triangle-triangle intersection.
//!
//! Each triangle is cut by the plane of the other; both cuts lie on the
//! line shared by the two planes and their overlap is the intersection
//! segment. Triangles lying in a common plane are clipped against each other
//! in 2D instead.

use ssi_math::{cross_2d, Point2, Point3, Vec2, Vec3};

/// Result of intersecting two triangles.
#[derive(Debug, Clone, PartialEq)]
pub enum TriTriContact {
    /// The triangles do not meet.
    Disjoint,
    /// The triangles cross along a segment (possibly of zero length).
    Segment(Point3, Point3),
    /// The triangles are coplanar and overlap; carries the overlap polygon.
    Coplanar(Vec<Point3>),
}

/// Intersect triangles `a` and `b`.
///
/// Vertex distances to the other plane below `eps` are treated as zero.
pub fn intersect_triangles(a: &[Point3; 3], b: &[Point3; 3], eps: f64) -> TriTriContact {
    let Some(na) = unit_normal(a) else {
        return TriTriContact::Disjoint;
    };
    let Some(nb) = unit_normal(b) else {
        return TriTriContact::Disjoint;
    };

    let db = plane_distances(&na, &a[0], b, eps);
    if same_strict_sign(&db) {
        return TriTriContact::Disjoint;
    }
    let da = plane_distances(&nb, &b[0], a, eps);
    if same_strict_sign(&da) {
        return TriTriContact::Disjoint;
    }

    if db.iter().all(|d| *d == 0.0) || da.iter().all(|d| *d == 0.0) {
        return coplanar_overlap(a, b, &na);
    }

    let cut_a = plane_cut(a, &da, eps);
    let cut_b = plane_cut(b, &db, eps);
    if cut_a.is_empty() || cut_b.is_empty() {
        return TriTriContact::Disjoint;
    }

    let mut dir = na.cross(&nb);
    if dir.norm() <= 1e-12 {
        // Nearly parallel planes: measure along the longer cut instead.
        let span = |c: &[Point3]| if c.len() == 2 { c[1] - c[0] } else { Vec3::zeros() };
        let (sa, sb) = (span(&cut_a), span(&cut_b));
        dir = if sa.norm() >= sb.norm() { sa } else { sb };
        if dir.norm() <= eps {
            return if (cut_a[0] - cut_b[0]).norm() <= eps {
                TriTriContact::Segment(cut_a[0], cut_a[0])
            } else {
                TriTriContact::Disjoint
            };
        }
    }
    let dir = dir.normalize();

    let (a_lo, a_hi) = interval(&cut_a, &dir);
    let (b_lo, b_hi) = interval(&cut_b, &dir);
    let (lo_t, lo_p) = if a_lo.0 >= b_lo.0 { a_lo } else { b_lo };
    let (hi_t, hi_p) = if a_hi.0 <= b_hi.0 { a_hi } else { b_hi };

    if lo_t > hi_t + eps {
        return TriTriContact::Disjoint;
    }
    if lo_t > hi_t {
        let mid = Point3::from((lo_p.coords + hi_p.coords) / 2.0);
        return TriTriContact::Segment(mid, mid);
    }
    TriTriContact::Segment(lo_p, hi_p)
}

/// Unit normal of a triangle, `None` for a degenerate triangle.
pub fn unit_normal(t: &[Point3; 3]) -> Option<Vec3> {
    let n = (t[1] - t[0]).cross(&(t[2] - t[0]));
    let len = n.norm();
    (len > 0.0 && len.is_finite()).then(|| n / len)
}

fn plane_distances(n: &Vec3, origin: &Point3, t: &[Point3; 3], eps: f64) -> [f64; 3] {
    t.map(|p| {
        let d = n.dot(&(p - origin));
        if d.abs() <= eps {
            0.0
        } else {
            d
        }
    })
}

fn same_strict_sign(d: &[f64; 3]) -> bool {
    d.iter().all(|x| *x > 0.0) || d.iter().all(|x| *x < 0.0)
}

/// Points of triangle `t` lying on the other plane, given the signed
/// distances `d` of its vertices.
fn plane_cut(t: &[Point3; 3], d: &[f64; 3], eps: f64) -> Vec<Point3> {
    let mut pts: Vec<Point3> = Vec::with_capacity(2);
    let mut push = |p: Point3| {
        if !pts.iter().any(|q| (q - p).norm() <= eps) {
            pts.push(p);
        }
    };
    for i in 0..3 {
        if d[i] == 0.0 {
            push(t[i]);
        }
    }
    // Edges in ascending vertex order so a shared edge gives the same point.
    for (i, j) in [(0, 1), (0, 2), (1, 2)] {
        if d[i] * d[j] < 0.0 {
            let s = d[i] / (d[i] - d[j]);
            push(t[i] + (t[j] - t[i]) * s);
        }
    }
    pts
}

type Bound = (f64, Point3);

fn interval(cut: &[Point3], dir: &Vec3) -> (Bound, Bound) {
    let mut lo = (f64::INFINITY, cut[0]);
    let mut hi = (f64::NEG_INFINITY, cut[0]);
    for p in cut {
        let t = dir.dot(&p.coords);
        if t < lo.0 {
            lo = (t, *p);
        }
        if t > hi.0 {
            hi = (t, *p);
        }
    }
    (lo, hi)
}

/// Project onto the coordinate plane most aligned with `n`.
fn drop_axis(n: &Vec3) -> usize {
    let a = n.abs();
    if a.x >= a.y && a.x >= a.z {
        0
    } else if a.y >= a.z {
        1
    } else {
        2
    }
}

fn to_2d(p: &Point3, axis: usize) -> Point2 {
    match axis {
        0 => Point2::new(p.y, p.z),
        1 => Point2::new(p.z, p.x),
        _ => Point2::new(p.x, p.y),
    }
}

fn lift(q: &Point2, axis: usize, n: &Vec3, origin: &Point3) -> Point3 {
    // Solve n·(p - origin) = 0 for the dropped coordinate.
    let c = n.dot(&origin.coords);
    match axis {
        0 => Point3::new((c - n.y * q.x - n.z * q.y) / n.x, q.x, q.y),
        1 => Point3::new(q.y, (c - n.z * q.x - n.x * q.y) / n.y, q.x),
        _ => Point3::new(q.x, q.y, (c - n.x * q.x - n.y * q.y) / n.z),
    }
}

/// Clip `b` against `a` in their common plane (Sutherland-Hodgman).
fn coplanar_overlap(a: &[Point3; 3], b: &[Point3; 3], na: &Vec3) -> TriTriContact {
    let axis = drop_axis(na);
    let mut clip: Vec<Point2> = a.iter().map(|p| to_2d(p, axis)).collect();
    let area = cross_2d(&(clip[1] - clip[0]), &(clip[2] - clip[0]));
    if area < 0.0 {
        clip.reverse();
    }
    let scale = (clip[1] - clip[0]).norm().max((clip[2] - clip[0]).norm());
    let tol = 1e-12 * scale * scale;

    let mut poly: Vec<Point2> = b.iter().map(|p| to_2d(p, axis)).collect();
    for k in 0..3 {
        if poly.is_empty() {
            break;
        }
        let e0 = clip[k];
        let e1 = clip[(k + 1) % 3];
        let edge: Vec2 = e1 - e0;
        let inside = |p: &Point2| cross_2d(&edge, &(p - e0)) >= -tol;
        let mut next = Vec::with_capacity(poly.len() + 1);
        for i in 0..poly.len() {
            let cur = poly[i];
            let prev = poly[(i + poly.len() - 1) % poly.len()];
            let (cin, pin) = (inside(&cur), inside(&prev));
            if cin != pin {
                let dp = cross_2d(&edge, &(prev - e0));
                let dc = cross_2d(&edge, &(cur - e0));
                let s = dp / (dp - dc);
                next.push(prev + (cur - prev) * s);
            }
            if cin {
                next.push(cur);
            }
        }
        poly = next;
    }

    if poly.is_empty() {
        return TriTriContact::Disjoint;
    }
    TriTriContact::Coplanar(poly.iter().map(|q| lift(q, axis, na, &a[0])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn tri(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> [Point3; 3] {
        [
            Point3::new(a[0], a[1], a[2]),
            Point3::new(b[0], b[1], b[2]),
            Point3::new(c[0], c[1], c[2]),
        ]
    }

    #[test]
    fn test_crossing_triangles() {
        let a = tri([0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 2.0, 0.0]);
        let b = tri([0.5, 0.5, -1.0], [0.5, 0.5, 1.0], [1.5, -0.5, 0.0]);
        match intersect_triangles(&a, &b, 1e-12) {
            TriTriContact::Segment(p, q) => {
                assert_abs_diff_eq!(p.z, 0.0, epsilon = 1e-12);
                assert_abs_diff_eq!(q.z, 0.0, epsilon = 1e-12);
                // The cut of b lies on the line x + y = 1, clipped at y = 0.
                assert_abs_diff_eq!(p.x + p.y, 1.0, epsilon = 1e-12);
                assert_abs_diff_eq!(q.x + q.y, 1.0, epsilon = 1e-12);
                assert!((p - q).norm() > 0.5);
            }
            other => panic!("expected segment, got {:?}", other),
        }
    }

    #[test]
    fn test_separated_triangles() {
        let a = tri([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let b = tri([0.0, 0.0, 1.0], [1.0, 0.0, 2.0], [0.0, 1.0, 1.5]);
        assert_eq!(intersect_triangles(&a, &b, 1e-12), TriTriContact::Disjoint);
    }

    #[test]
    fn test_planes_cross_but_triangles_miss() {
        let a = tri([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let b = tri([5.0, 5.0, -1.0], [5.0, 5.0, 1.0], [6.0, 5.0, 0.0]);
        assert_eq!(intersect_triangles(&a, &b, 1e-12), TriTriContact::Disjoint);
    }

    #[test]
    fn test_vertex_touch_is_point_segment() {
        let a = tri([-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [0.0, 1.0, 0.0]);
        let b = tri([0.0, 0.0, 0.0], [1.0, 0.0, -1.0], [0.0, 1.0, -1.0]);
        match intersect_triangles(&a, &b, 1e-12) {
            TriTriContact::Segment(p, q) => {
                assert_abs_diff_eq!((p - q).norm(), 0.0, epsilon = 1e-12);
                assert_abs_diff_eq!(p.coords.norm(), 0.0, epsilon = 1e-12);
            }
            other => panic!("expected point contact, got {:?}", other),
        }
    }

    #[test]
    fn test_coplanar_overlap() {
        let a = tri([0.0, 0.0, 1.0], [2.0, 0.0, 1.0], [0.0, 2.0, 1.0]);
        let b = tri([1.0, 1.0, 1.0], [-1.0, 1.0, 1.0], [1.0, -1.0, 1.0]);
        match intersect_triangles(&a, &b, 1e-9) {
            TriTriContact::Coplanar(poly) => {
                assert!(poly.len() >= 3);
                for p in &poly {
                    assert_abs_diff_eq!(p.z, 1.0, epsilon = 1e-12);
                    assert!(p.x >= -1e-12 && p.y >= -1e-12 && p.x + p.y <= 2.0 + 1e-12);
                }
            }
            other => panic!("expected coplanar, got {:?}", other),
        }
    }

    #[test]
    fn test_coplanar_disjoint() {
        let a = tri([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let b = tri([3.0, 3.0, 0.0], [4.0, 3.0, 0.0], [3.0, 4.0, 0.0]);
        assert_eq!(intersect_triangles(&a, &b, 1e-9), TriTriContact::Disjoint);
    }

    #[test]
    fn test_symmetric_endpoints() {
        let a = tri([0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 2.0, 0.0]);
        let b = tri([0.5, 0.5, -1.0], [0.5, 0.5, 1.0], [1.5, -0.5, 0.0]);
        let (TriTriContact::Segment(p, q), TriTriContact::Segment(r, s)) = (
            intersect_triangles(&a, &b, 1e-12),
            intersect_triangles(&b, &a, 1e-12),
        ) else {
            panic!("expected segments");
        };
        let same = (p - r).norm() < 1e-12 && (q - s).norm() < 1e-12;
        let swapped = (p - s).norm() < 1e-12 && (q - r).norm() < 1e-12;
        assert!(same || swapped);
    }
}
