//! Query entry point: input validation, staging and result assembly.

use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use ssi_geom::{Surface, UNBOUNDED};

use crate::bbox::Aabb3;
use crate::couple::find_candidates;
use crate::error::{Result, SsiError, Stage};
use crate::join::join_lines;
use crate::mesh::{CellGrid, MeshBuilder, SurfaceMesh};
use crate::point::IntersectionPoint;
use crate::section::{assemble, TangentZone};
use crate::settings::{IntersectionSettings, ParamRange, SampleHints};
use crate::walk::Refiner;
use crate::wline::WLine;

/// Quality diagnostics of a query. None of these abort the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntersectionStatus {
    /// Mesh cells dropped because the surface could not be evaluated, per surface.
    pub degenerate_cells: [usize; 2],
    /// Zero-area triangles dropped at collapsed parameter lines, per surface.
    pub collapsed_triangles: [usize; 2],
    /// Line points that did not reach the tolerance.
    pub low_confidence_points: usize,
    /// Tangent-candidate clusters too small to report.
    pub discarded_tangent_zones: usize,
    /// Candidate pairs found only through the circumscribed meshes.
    pub circumscribed_pairs: usize,
}

impl IntersectionStatus {
    /// True if either surface had unevaluable regions.
    pub fn has_degenerate_regions(&self) -> bool {
        self.degenerate_cells.iter().any(|&c| c > 0)
    }

    /// No degenerate regions and every point within tolerance.
    pub fn is_clean(&self) -> bool {
        !self.has_degenerate_regions() && self.low_confidence_points == 0
    }
}

/// Result of an intersection query.
#[derive(Debug, Clone, Default)]
pub struct Intersection {
    /// Intersection curves.
    pub lines: Vec<WLine>,
    /// Isolated contact points (touching surfaces, collapsed sections).
    pub isolated_points: Vec<IntersectionPoint>,
    /// Regions where the surfaces coincide.
    pub tangent_zones: Vec<TangentZone>,
    /// Diagnostics.
    pub status: IntersectionStatus,
}

impl Intersection {
    /// True if nothing was found.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.isolated_points.is_empty() && self.tangent_zones.is_empty()
    }
}

/// Intersects surface pairs with fixed settings.
///
/// # Example
///
/// ```
/// use ssi_core::{IntersectionSettings, Intersector, SampleHints};
/// use ssi_geom::SphereSurface;
/// use ssi_math::Point3;
///
/// let a = SphereSurface::new(10.0);
/// let b = SphereSurface::with_center(Point3::new(15.0, 0.0, 0.0), 10.0);
/// let result = Intersector::new(IntersectionSettings::default())
///     .intersect(&a, &b, &SampleHints::default())
///     .unwrap();
/// assert_eq!(result.lines.len(), 1);
/// assert!(result.lines[0].is_closed());
/// ```
#[derive(Debug, Clone)]
pub struct Intersector<'c> {
    settings: IntersectionSettings,
    cancel: Option<&'c AtomicBool>,
}

impl<'c> Intersector<'c> {
    /// Intersector with the given settings.
    pub fn new(settings: IntersectionSettings) -> Self {
        Self {
            settings,
            cancel: None,
        }
    }

    /// Check `flag` between stages; a raised flag aborts the query.
    pub fn with_cancel(mut self, flag: &'c AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// The settings in use.
    pub fn settings(&self) -> &IntersectionSettings {
        &self.settings
    }

    fn check_cancel(&self, stage: Stage) -> Result<()> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => {
                debug!("intersection cancelled after {}", stage);
                Err(SsiError::Cancelled { stage })
            }
            _ => Ok(()),
        }
    }

    /// Intersect `s1` with `s2`.
    ///
    /// Inputs are validated before any work starts. Recoverable problems are
    /// reported in [`Intersection::status`]; an empty intersection is an
    /// empty result, not an error.
    pub fn intersect(
        &self,
        s1: &dyn Surface,
        s2: &dyn Surface,
        hints: &SampleHints,
    ) -> Result<Intersection> {
        let settings = &self.settings;
        settings.validate()?;
        let range1 = self.sample_range(1, s1, hints.uv1)?;
        let range2 = self.sample_range(2, s2, hints.uv2)?;
        let grid1 = self.grid(hints.samples1)?;
        let grid2 = self.grid(hints.samples2)?;

        let (range1, range2) = if settings.restrict_to_common_box {
            match self.common_ranges(s1, range1, grid1, s2, range2, grid2) {
                Some(ranges) => ranges,
                None => {
                    self.check_cancel(Stage::MeshBuild)?;
                    debug!(
                        "intersection {:?}/{:?}: bounding boxes do not meet",
                        s1.surface_type(),
                        s2.surface_type()
                    );
                    return Ok(Intersection::default());
                }
            }
        } else {
            (range1, range2)
        };

        let build = |s: &dyn Surface, range: ParamRange, grid: (usize, usize)| -> SurfaceMesh {
            let mut builder = MeshBuilder::new(s, range.u, range.v)
                .samples(grid.0, grid.1)
                .deflection(settings.deflection)
                .max_depth(settings.max_refine_depth);
            if settings.use_circumscribed {
                builder = builder.circumscribed(settings.circumscribe_factor);
            }
            builder.build()
        };
        let (mesh1, mesh2) = if settings.parallel {
            rayon::join(|| build(s1, range1, grid1), || build(s2, range2, grid2))
        } else {
            (build(s1, range1, grid1), build(s2, range2, grid2))
        };
        self.check_cancel(Stage::MeshBuild)?;

        let coupling = find_candidates(&mesh1, &mesh2, settings);
        self.check_cancel(Stage::CouplingSearch)?;

        let mut model = Aabb3::empty();
        model.include_box(mesh1.bounds());
        model.include_box(mesh2.bounds());
        let merge = settings.merge_distance(if model.is_empty() { 0.0 } else { model.diagonal() });
        let assembly = assemble(
            &coupling.pairs,
            &mesh1,
            &mesh2,
            merge,
            settings.min_tangent_zone_points,
        );

        let refiner = Refiner::new(s1, s2, settings);
        let mut result = Intersection {
            tangent_zones: assembly.tangent_zones,
            status: IntersectionStatus {
                degenerate_cells: [mesh1.degenerate_cells, mesh2.degenerate_cells],
                collapsed_triangles: [mesh1.collapsed_triangles, mesh2.collapsed_triangles],
                low_confidence_points: 0,
                discarded_tangent_zones: assembly.discarded_tangent_zones,
                circumscribed_pairs: coupling.circumscribed_pairs,
            },
            ..Default::default()
        };

        let mut collapsed = Vec::new();
        for section in &assembly.lines {
            let refined = refiner.refine_line(section);
            result.status.low_confidence_points += refined.low_confidence;
            result.lines.extend(refined.lines);
            collapsed.extend(refined.points);
            self.check_cancel(Stage::SectionRefinement)?;
        }
        if settings.join_lines {
            let lines = std::mem::take(&mut result.lines);
            result.lines = join_lines(lines, merge, |a, b| refiner.bridge_point(a, b));
        }
        if settings.purge_lines {
            for line in &mut result.lines {
                line.purge(settings.tolerance);
            }
        }

        let candidates = collapsed
            .into_iter()
            .chain(assembly.isolated.iter().filter_map(|s| refiner.refine_isolated(s)))
            .chain(
                assembly
                    .near_clusters
                    .iter()
                    .filter_map(|c| refiner.refine_near_cluster(c)),
            );
        for p in candidates {
            let duplicate = result
                .isolated_points
                .iter()
                .any(|q| (q.point - p.point).norm() <= merge)
                || result.lines.iter().any(|l| near_line(l, &p.point, merge));
            if !duplicate {
                result.isolated_points.push(p);
            }
        }

        debug!(
            "intersection {:?}/{:?}: {} lines, {} isolated points, {} tangent zones, {:?}",
            s1.surface_type(),
            s2.surface_type(),
            result.lines.len(),
            result.isolated_points.len(),
            result.tangent_zones.len(),
            result.status
        );
        Ok(result)
    }

    /// Shrink both sampled rectangles to the grid cells that reach the common
    /// box of the two surfaces. `None` when the surfaces cannot meet.
    fn common_ranges(
        &self,
        s1: &dyn Surface,
        range1: ParamRange,
        grid1: (usize, usize),
        s2: &dyn Surface,
        range2: ParamRange,
        grid2: (usize, usize),
    ) -> Option<(ParamRange, ParamRange)> {
        let (cells1, cells2) = if self.settings.parallel {
            rayon::join(
                || CellGrid::sample(s1, range1, grid1),
                || CellGrid::sample(s2, range2, grid2),
            )
        } else {
            (
                CellGrid::sample(s1, range1, grid1),
                CellGrid::sample(s2, range2, grid2),
            )
        };
        let mut model = *cells1.bounds();
        model.include_box(cells2.bounds());
        let pad = self.settings.merge_distance(model.diagonal());
        let common = cells1.bounds().intersection(cells2.bounds())?.expanded(pad);
        let restricted1 = cells1.restrict(&common)?;
        let restricted2 = cells2.restrict(&common)?;
        debug!(
            "common box: surface 1 {:?} -> {:?}, surface 2 {:?} -> {:?}",
            range1, restricted1, range2, restricted2
        );
        Some((restricted1, restricted2))
    }

    /// Validated parameter rectangle to sample, unbounded directions clamped.
    fn sample_range(
        &self,
        surface: usize,
        s: &dyn Surface,
        hint: Option<ParamRange>,
    ) -> Result<ParamRange> {
        let (u, v) = match hint {
            Some(r) => (r.u, r.v),
            None => s.domain(),
        };
        let bad = |r: (f64, f64)| r.0.is_nan() || r.1.is_nan() || r.0 >= r.1;
        if bad(u) || bad(v) {
            return Err(SsiError::InvalidBounds {
                surface,
                u_min: u.0,
                u_max: u.1,
                v_min: v.0,
                v_max: v.1,
            });
        }
        let clamp = self.settings.unbounded_clamp;
        let limit = |r: (f64, f64)| {
            let lo = if r.0 <= -UNBOUNDED { -clamp } else { r.0 };
            let hi = if r.1 >= UNBOUNDED { clamp } else { r.1 };
            if lo < hi {
                (lo, hi)
            } else {
                // Half-infinite range beyond the clamp: sample one clamp length.
                if r.0 <= -UNBOUNDED {
                    (hi - clamp, hi)
                } else {
                    (lo, lo + clamp)
                }
            }
        };
        Ok(ParamRange::new(limit(u), limit(v)))
    }

    fn grid(&self, hint: Option<(usize, usize)>) -> Result<(usize, usize)> {
        let grid = hint.unwrap_or((self.settings.samples_u, self.settings.samples_v));
        if grid.0 < 2 || grid.1 < 2 {
            return Err(SsiError::InvalidSettings(format!(
                "sample grid must be at least 2x2, got {}x{}",
                grid.0, grid.1
            )));
        }
        Ok(grid)
    }
}

/// True if `p` is within `dist` of the polyline of `line`.
fn near_line(line: &WLine, p: &ssi_math::Point3, dist: f64) -> bool {
    if line.bounding_box().expanded(dist).contains(p) {
        let pts = line.points();
        if pts.len() == 1 {
            return (pts[0].point - p).norm() <= dist;
        }
        pts.windows(2).any(|w| {
            let (a, b) = (w[0].point, w[1].point);
            let ab = b - a;
            let len2 = ab.norm_squared();
            let t = if len2 > 0.0 {
                ((p - a).dot(&ab) / len2).clamp(0.0, 1.0)
            } else {
                0.0
            };
            (a + ab * t - p).norm() <= dist
        })
    } else {
        false
    }
}

/// Intersect two surfaces with default settings and the given tolerance.
pub fn intersect(s1: &dyn Surface, s2: &dyn Surface, tolerance: f64) -> Result<Intersection> {
    Intersector::new(IntersectionSettings::with_tolerance(tolerance)).intersect(
        s1,
        s2,
        &SampleHints::default(),
    )
}
