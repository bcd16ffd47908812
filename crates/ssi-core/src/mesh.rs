//! Adaptive sampling of a surface into a triangle mesh.
//!
//! The parameter rectangle is sampled on a tensor-product grid. Grid spans
//! are split while the chord midpoint deviates from the surface by more than
//! the deflection, so cells stay conforming (no T-junctions). Each cell is
//! cut into two triangles whose vertices lie on the surface (the inscribed
//! mesh). The circumscribed variant moves every vertex along the surface
//! normal, away from the chords, by a multiple of the local deviation.

use log::{debug, warn};
use ssi_geom::{Surface, SurfaceKind};
use ssi_math::{Dir3, Point2, Point3, Vec3};

use crate::bbox::Aabb3;
use crate::settings::ParamRange;

/// A mesh vertex: a surface sample with its parameters.
#[derive(Debug, Clone, Copy)]
pub struct MeshVertex {
    /// Surface point (NaN when the sample failed).
    pub point: Point3,
    /// Parameters of the sample.
    pub uv: Point2,
    /// Surface normal, `None` at singular samples.
    pub normal: Option<Dir3>,
    /// Whether the surface could be evaluated here.
    pub valid: bool,
    offset_dir: Vec3,
}

/// A mesh triangle.
#[derive(Debug, Clone, Copy)]
pub struct MeshTriangle {
    /// Vertex indices, counter-clockwise in parameter space.
    pub vertices: [usize; 3],
    /// Deviation between the triangle and the surface over its footprint.
    pub deflection: f64,
}

/// Triangulated approximation of one surface over a parameter rectangle.
#[derive(Debug, Clone)]
pub struct SurfaceMesh {
    /// Grid samples, row-major in u.
    pub vertices: Vec<MeshVertex>,
    /// Triangles over the valid cells.
    pub triangles: Vec<MeshTriangle>,
    /// Chord tolerance the mesh was refined against.
    pub deflection: f64,
    /// Cells dropped because a corner could not be evaluated.
    pub degenerate_cells: usize,
    /// Zero-area triangles dropped (collapsed parameter lines such as poles).
    pub collapsed_triangles: usize,
    /// Sampled u range.
    pub u_range: (f64, f64),
    /// Sampled v range.
    pub v_range: (f64, f64),
    shifted: Option<Vec<Point3>>,
    bounds: Aabb3,
}

impl SurfaceMesh {
    /// True if the mesh has no triangles.
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Box around every vertex of both variants.
    pub fn bounds(&self) -> &Aabb3 {
        &self.bounds
    }

    /// Whether a circumscribed variant was built.
    pub fn has_circumscribed(&self) -> bool {
        self.shifted.is_some()
    }

    /// Corner points of triangle `t` (inscribed variant).
    pub fn triangle_points(&self, t: usize) -> [Point3; 3] {
        let [a, b, c] = self.triangles[t].vertices;
        [
            self.vertices[a].point,
            self.vertices[b].point,
            self.vertices[c].point,
        ]
    }

    /// Corner points of triangle `t` in the circumscribed variant.
    pub fn circumscribed_points(&self, t: usize) -> Option<[Point3; 3]> {
        let shifted = self.shifted.as_ref()?;
        let [a, b, c] = self.triangles[t].vertices;
        Some([shifted[a], shifted[b], shifted[c]])
    }

    /// Corner parameters of triangle `t`.
    pub fn triangle_uvs(&self, t: usize) -> [Point2; 3] {
        let [a, b, c] = self.triangles[t].vertices;
        [self.vertices[a].uv, self.vertices[b].uv, self.vertices[c].uv]
    }

    /// Box of triangle `t` over both variants, expanded by `pad`.
    pub fn triangle_box(&self, t: usize, pad: f64) -> Aabb3 {
        let mut aabb = Aabb3::from_points(self.triangle_points(t).iter());
        if let Some(pts) = self.circumscribed_points(t) {
            for p in &pts {
                aabb.include_point(p);
            }
        }
        aabb.expanded(pad)
    }

    /// Parameters of a point of triangle `t`, by barycentric interpolation.
    pub fn uv_at(&self, t: usize, p: &Point3) -> Point2 {
        let w = barycentric(&self.triangle_points(t), p);
        let uv = self.triangle_uvs(t);
        Point2::from(w[0] * uv[0].coords + w[1] * uv[1].coords + w[2] * uv[2].coords)
    }
}

/// Barycentric weights of `p` projected on the plane of `tri`.
pub fn barycentric(tri: &[Point3; 3], p: &Point3) -> [f64; 3] {
    let e0 = tri[1] - tri[0];
    let e1 = tri[2] - tri[0];
    let d = p - tri[0];
    let d00 = e0.dot(&e0);
    let d01 = e0.dot(&e1);
    let d11 = e1.dot(&e1);
    let d20 = d.dot(&e0);
    let d21 = d.dot(&e1);
    match ssi_math::solve_2x2(d00, d01, d01, d11, d20, d21) {
        Some((v, w)) => [1.0 - v - w, v, w],
        None => [1.0 / 3.0; 3],
    }
}

/// Configures and runs the mesh construction of one surface.
#[derive(Debug, Clone)]
pub struct MeshBuilder<'a> {
    surface: &'a dyn Surface,
    u_range: (f64, f64),
    v_range: (f64, f64),
    samples_u: usize,
    samples_v: usize,
    deflection: Option<f64>,
    max_depth: usize,
    circumscribe_factor: Option<f64>,
}

impl<'a> MeshBuilder<'a> {
    /// Mesh `surface` over `u_range × v_range` with a 21×21 initial grid.
    pub fn new(surface: &'a dyn Surface, u_range: (f64, f64), v_range: (f64, f64)) -> Self {
        Self {
            surface,
            u_range,
            v_range,
            samples_u: 21,
            samples_v: 21,
            deflection: None,
            max_depth: 4,
            circumscribe_factor: None,
        }
    }

    /// Initial grid size.
    pub fn samples(mut self, samples_u: usize, samples_v: usize) -> Self {
        self.samples_u = samples_u.max(2);
        self.samples_v = samples_v.max(2);
        self
    }

    /// Chord tolerance; `None` uses 1% of the sampled bounding-box diagonal.
    pub fn deflection(mut self, deflection: Option<f64>) -> Self {
        self.deflection = deflection;
        self
    }

    /// Maximum number of span subdivision passes.
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Also build the circumscribed variant, offset by `factor` times the
    /// local deviation.
    pub fn circumscribed(mut self, factor: f64) -> Self {
        self.circumscribe_factor = Some(factor);
        self
    }

    /// Sample, refine and triangulate.
    pub fn build(&self) -> SurfaceMesh {
        let s = self.surface;
        let mut us = linspace(self.u_range, self.samples_u);
        let mut vs = linspace(self.v_range, self.samples_v);

        let deflection = match self.deflection {
            Some(d) => d,
            None => {
                let mut aabb = Aabb3::empty();
                for &u in &us {
                    for &v in &vs {
                        let p = s.evaluate(Point2::new(u, v));
                        if ssi_math::is_finite_point(&p) {
                            aabb.include_point(&p);
                        }
                    }
                }
                0.01 * aabb.diagonal()
            }
        }
        .max(1e-12);

        if s.surface_type() != SurfaceKind::Plane {
            for _ in 0..self.max_depth {
                let new_us = refine_spans(&us, &vs, deflection, |a, b| s.evaluate(Point2::new(a, b)));
                let new_vs = refine_spans(&vs, &new_us, deflection, |a, b| s.evaluate(Point2::new(b, a)));
                let changed = new_us.len() != us.len() || new_vs.len() != vs.len();
                us = new_us;
                vs = new_vs;
                if !changed {
                    break;
                }
            }
        }

        let nv = vs.len();
        let mut vertices = Vec::with_capacity(us.len() * nv);
        for &u in &us {
            for &v in &vs {
                let uv = Point2::new(u, v);
                let d = s.derivatives(uv);
                let valid = d.is_finite();
                let normal = if valid { s.normal(uv) } else { None };
                // Offset away from the chords: against the normal curvature.
                let offset_dir = match normal {
                    Some(n) => {
                        let bend = d.duu.dot(n.as_ref()) + d.dvv.dot(n.as_ref());
                        if bend > 0.0 {
                            -n.into_inner()
                        } else {
                            n.into_inner()
                        }
                    }
                    None => Vec3::zeros(),
                };
                vertices.push(MeshVertex {
                    point: d.point,
                    uv,
                    normal,
                    valid,
                    offset_dir,
                });
            }
        }

        let idx = |i: usize, j: usize| i * nv + j;
        let mut triangles = Vec::new();
        let mut degenerate_cells = 0;
        let mut collapsed_triangles = 0;
        for i in 0..us.len() - 1 {
            for j in 0..nv - 1 {
                let (a, b, c, d) = (idx(i, j), idx(i + 1, j), idx(i + 1, j + 1), idx(i, j + 1));
                if ![a, b, c, d].iter().all(|&k| vertices[k].valid) {
                    degenerate_cells += 1;
                    continue;
                }
                for tri in [[a, b, c], [a, c, d]] {
                    let [p0, p1, p2] = tri.map(|k| vertices[k].point);
                    let cross = (p1 - p0).cross(&(p2 - p0)).norm();
                    let edge2 = (p1 - p0)
                        .norm_squared()
                        .max((p2 - p1).norm_squared())
                        .max((p0 - p2).norm_squared());
                    if edge2 == 0.0 || cross <= 1e-12 * edge2 {
                        collapsed_triangles += 1;
                        continue;
                    }
                    let tri_deflection = triangle_deflection(s, &vertices, tri, deflection);
                    triangles.push(MeshTriangle {
                        vertices: tri,
                        deflection: tri_deflection,
                    });
                }
            }
        }

        if degenerate_cells > 0 {
            warn!(
                "{:?} mesh: {} degenerate cells excluded",
                s.surface_type(),
                degenerate_cells
            );
        }

        let shifted = self.circumscribe_factor.map(|factor| {
            let mut local = vec![0.0f64; vertices.len()];
            for t in &triangles {
                for &k in &t.vertices {
                    local[k] = local[k].max(t.deflection);
                }
            }
            vertices
                .iter()
                .zip(&local)
                .map(|(v, &dl)| v.point + v.offset_dir * factor * dl)
                .collect::<Vec<_>>()
        });

        let mut bounds = Aabb3::empty();
        for v in vertices.iter().filter(|v| v.valid) {
            bounds.include_point(&v.point);
        }
        if let Some(pts) = &shifted {
            for p in pts.iter().filter(|p| ssi_math::is_finite_point(p)) {
                bounds.include_point(p);
            }
        }

        debug!(
            "{:?} mesh: {}x{} grid, {} triangles, deflection {:.3e}, {} collapsed",
            s.surface_type(),
            us.len(),
            nv,
            triangles.len(),
            deflection,
            collapsed_triangles
        );

        SurfaceMesh {
            vertices,
            triangles,
            deflection,
            degenerate_cells,
            collapsed_triangles,
            u_range: self.u_range,
            v_range: self.v_range,
            shifted,
            bounds,
        }
    }
}

/// Coarse per-cell boxes of a surface over a parameter rectangle.
///
/// Each cell box covers the four corner samples and the cell centre, grown
/// by the centre's offset from the corner mean so the bulge of a curved cell
/// stays inside. Used to cut a sampled range down to the part that can reach
/// the other surface before the full mesh is built.
#[derive(Debug, Clone)]
pub struct CellGrid {
    us: Vec<f64>,
    vs: Vec<f64>,
    /// Row-major in u, `(nu - 1) * (nv - 1)` boxes; empty where no sample
    /// of the cell could be evaluated.
    cells: Vec<Aabb3>,
    bounds: Aabb3,
}

impl CellGrid {
    /// Sample `surface` on a `samples.0 × samples.1` grid over `range`.
    pub fn sample(surface: &dyn Surface, range: ParamRange, samples: (usize, usize)) -> Self {
        let us = linspace(range.u, samples.0);
        let vs = linspace(range.v, samples.1);
        let nv = vs.len();
        let mut corners = Vec::with_capacity(us.len() * nv);
        for &u in &us {
            for &v in &vs {
                corners.push(surface.evaluate(Point2::new(u, v)));
            }
        }

        let mut cells = Vec::with_capacity((us.len() - 1) * (nv - 1));
        let mut bounds = Aabb3::empty();
        for i in 0..us.len() - 1 {
            for j in 0..nv - 1 {
                let quad = [
                    corners[i * nv + j],
                    corners[(i + 1) * nv + j],
                    corners[(i + 1) * nv + j + 1],
                    corners[i * nv + j + 1],
                ];
                let centre = surface.evaluate(Point2::new(
                    0.5 * (us[i] + us[i + 1]),
                    0.5 * (vs[j] + vs[j + 1]),
                ));
                let mut aabb = Aabb3::from_points(
                    quad.iter()
                        .chain(std::iter::once(&centre))
                        .filter(|p| ssi_math::is_finite_point(p)),
                );
                if !aabb.is_empty() {
                    let mean = quad.iter().fold(Vec3::zeros(), |acc, p| acc + p.coords) / 4.0;
                    let bulge = (centre.coords - mean).norm();
                    if bulge.is_finite() {
                        aabb.expand(bulge);
                    }
                    bounds.include_box(&aabb);
                }
                cells.push(aabb);
            }
        }
        Self {
            us,
            vs,
            cells,
            bounds,
        }
    }

    /// Box around every evaluable cell.
    pub fn bounds(&self) -> &Aabb3 {
        &self.bounds
    }

    /// Smallest grid-aligned rectangle holding every cell whose box meets
    /// `target`, or `None` when no cell does.
    pub fn restrict(&self, target: &Aabb3) -> Option<ParamRange> {
        let nv = self.vs.len() - 1;
        let mut hit: Option<(usize, usize, usize, usize)> = None;
        for (k, cell) in self.cells.iter().enumerate() {
            if !cell.overlaps(target) {
                continue;
            }
            let (i, j) = (k / nv, k % nv);
            hit = Some(match hit {
                None => (i, i, j, j),
                Some((i0, i1, j0, j1)) => (i0.min(i), i1.max(i), j0.min(j), j1.max(j)),
            });
        }
        hit.map(|(i0, i1, j0, j1)| {
            ParamRange::new((self.us[i0], self.us[i1 + 1]), (self.vs[j0], self.vs[j1 + 1]))
        })
    }
}

fn linspace(range: (f64, f64), n: usize) -> Vec<f64> {
    let n = n.max(2);
    (0..n)
        .map(|i| {
            if i == n - 1 {
                range.1
            } else {
                range.0 + (range.1 - range.0) * i as f64 / (n - 1) as f64
            }
        })
        .collect()
}

/// Split every span of `params` whose chord midpoint deviates from the
/// surface by more than `deflection` along any line of `across`.
fn refine_spans(
    params: &[f64],
    across: &[f64],
    deflection: f64,
    eval: impl Fn(f64, f64) -> Point3,
) -> Vec<f64> {
    let mut out = Vec::with_capacity(params.len() * 2);
    for w in params.windows(2) {
        out.push(w[0]);
        let mid = 0.5 * (w[0] + w[1]);
        let deviation = across
            .iter()
            .filter_map(|&t| {
                let a = eval(w[0], t);
                let b = eval(w[1], t);
                let m = eval(mid, t);
                let chord = Point3::from((a.coords + b.coords) / 2.0);
                let d = (m - chord).norm();
                d.is_finite().then_some(d)
            })
            .fold(0.0f64, f64::max);
        if deviation > deflection {
            out.push(mid);
        }
    }
    if let Some(&last) = params.last() {
        out.push(last);
    }
    out
}

/// Deviation of the surface from the triangle at the parametric centroid and
/// the three edge midpoints.
fn triangle_deflection(
    s: &dyn Surface,
    vertices: &[MeshVertex],
    tri: [usize; 3],
    fallback: f64,
) -> f64 {
    let [a, b, c] = tri.map(|k| vertices[k]);
    let probes = [
        (Point2::from((a.uv.coords + b.uv.coords + c.uv.coords) / 3.0),
         Point3::from((a.point.coords + b.point.coords + c.point.coords) / 3.0)),
        (Point2::from((a.uv.coords + b.uv.coords) / 2.0),
         Point3::from((a.point.coords + b.point.coords) / 2.0)),
        (Point2::from((b.uv.coords + c.uv.coords) / 2.0),
         Point3::from((b.point.coords + c.point.coords) / 2.0)),
        (Point2::from((c.uv.coords + a.uv.coords) / 2.0),
         Point3::from((c.point.coords + a.point.coords) / 2.0)),
    ];
    let mut dev = 0.0f64;
    for (uv, on_triangle) in probes {
        let p = s.evaluate(uv);
        if !ssi_math::is_finite_point(&p) {
            return fallback;
        }
        dev = dev.max((p - on_triangle).norm());
    }
    dev
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ssi_geom::{Plane, SphereSurface, SurfaceDerivatives};
    use std::f64::consts::PI;

    #[test]
    fn test_plane_mesh_not_refined() {
        let plane = Plane::xy();
        let mesh = MeshBuilder::new(&plane, (-1.0, 1.0), (-1.0, 1.0))
            .samples(5, 4)
            .build();
        assert_eq!(mesh.vertices.len(), 20);
        assert_eq!(mesh.triangles.len(), 4 * 3 * 2);
        assert_eq!(mesh.degenerate_cells, 0);
        assert!(mesh.triangles.iter().all(|t| t.deflection < 1e-12));
        assert!(!mesh.has_circumscribed());
    }

    #[test]
    fn test_sphere_mesh_drops_pole_triangles() {
        let sphere = SphereSurface::new(10.0);
        let mesh = MeshBuilder::new(&sphere, (0.0, 2.0 * PI), (-PI / 2.0, PI / 2.0))
            .samples(9, 9)
            .max_depth(0)
            .build();
        // One triangle per cell collapses on each pole row.
        assert_eq!(mesh.collapsed_triangles, 2 * 8);
        assert_eq!(mesh.triangles.len(), 8 * 8 * 2 - 16);
        assert_eq!(mesh.degenerate_cells, 0);
        for v in &mesh.vertices {
            assert_abs_diff_eq!(v.point.coords.norm(), 10.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_refinement_respects_deflection() {
        let sphere = SphereSurface::new(10.0);
        let coarse = MeshBuilder::new(&sphere, (0.0, 2.0 * PI), (-1.0, 1.0))
            .samples(5, 5)
            .deflection(Some(0.05))
            .max_depth(0)
            .build();
        let fine = MeshBuilder::new(&sphere, (0.0, 2.0 * PI), (-1.0, 1.0))
            .samples(5, 5)
            .deflection(Some(0.05))
            .max_depth(6)
            .build();
        assert!(fine.triangles.len() > coarse.triangles.len());
        let worst_coarse = coarse.triangles.iter().map(|t| t.deflection).fold(0.0, f64::max);
        let worst_fine = fine.triangles.iter().map(|t| t.deflection).fold(0.0, f64::max);
        assert!(worst_fine < worst_coarse);
    }

    #[test]
    fn test_circumscribed_encloses_sphere() {
        let sphere = SphereSurface::new(10.0);
        let mesh = MeshBuilder::new(&sphere, (0.0, 2.0 * PI), (-1.0, 1.0))
            .samples(12, 8)
            .circumscribed(1.5)
            .build();
        assert!(mesh.has_circumscribed());
        for t in 0..mesh.triangles.len() {
            let inner = mesh.triangle_points(t);
            let outer = mesh.circumscribed_points(t).unwrap();
            for (i, o) in inner.iter().zip(&outer) {
                assert!(o.coords.norm() >= i.coords.norm() - 1e-12);
            }
        }
    }

    #[test]
    fn test_cell_grid_restricts_to_a_band() {
        let sphere = SphereSurface::new(1.0);
        let grid = CellGrid::sample(
            &sphere,
            ParamRange::new((0.0, 2.0 * PI), (-PI / 2.0, PI / 2.0)),
            (21, 21),
        );
        for p in [Point3::new(0.0, 0.0, 1.0), Point3::new(-1.0, 0.0, 0.0)] {
            assert!(grid.bounds().contains(&p));
        }

        // Thin slab at the height of a plane z = 0.5.
        let slab = Aabb3::new(Point3::new(-2.0, -2.0, 0.5), Point3::new(2.0, 2.0, 0.5));
        let r = grid.restrict(&slab).unwrap();
        assert_eq!(r.u, (0.0, 2.0 * PI));
        assert!(r.v.0 > 0.0 && r.v.1 < PI / 2.0 - 0.1);
        assert!(r.v.0 <= PI / 6.0 && PI / 6.0 <= r.v.1);

        let far = Aabb3::new(Point3::new(5.0, 5.0, 5.0), Point3::new(6.0, 6.0, 6.0));
        assert!(grid.restrict(&far).is_none());
    }

    #[test]
    fn test_barycentric_uv() {
        let plane = Plane::xy();
        let mesh = MeshBuilder::new(&plane, (0.0, 2.0), (0.0, 2.0)).samples(3, 3).build();
        let uv = mesh.uv_at(0, &Point3::new(0.75, 0.25, 0.0));
        assert_abs_diff_eq!(uv.x, 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(uv.y, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_samples_make_degenerate_cells() {
        #[derive(Debug)]
        struct Holey(Plane);
        impl Surface for Holey {
            fn evaluate(&self, uv: Point2) -> Point3 {
                if uv.x > 0.9 && uv.y > 0.9 {
                    Point3::new(f64::NAN, 0.0, 0.0)
                } else {
                    self.0.evaluate(uv)
                }
            }
            fn d_du(&self, uv: Point2) -> Vec3 {
                self.0.d_du(uv)
            }
            fn d_dv(&self, uv: Point2) -> Vec3 {
                self.0.d_dv(uv)
            }
            fn derivatives(&self, uv: Point2) -> SurfaceDerivatives {
                let mut d = self.0.derivatives(uv);
                d.point = self.evaluate(uv);
                d
            }
            fn domain(&self) -> ((f64, f64), (f64, f64)) {
                ((0.0, 1.0), (0.0, 1.0))
            }
            fn surface_type(&self) -> SurfaceKind {
                SurfaceKind::Other
            }
        }
        let s = Holey(Plane::xy());
        let mesh = MeshBuilder::new(&s, (0.0, 1.0), (0.0, 1.0))
            .samples(3, 3)
            .deflection(Some(0.1))
            .build();
        // Only the corner sample (1, 1) fails; one cell touches it.
        assert_eq!(mesh.degenerate_cells, 1);
        assert_eq!(mesh.triangles.len(), 6);
    }
}
