//! Chaining of candidate segments into section lines and grouping of tangent
//! candidates into tangent zones.
//!
//! Segment endpoints go into an arena. A spatial hash quantized by the merge
//! distance finds earlier endpoints within reach and a union-find merges them,
//! so every distinct location ends up as one node. Section lines are then
//! walked out of the node graph: open chains run between nodes whose degree is
//! not two, the remaining edges form closed loops.

use std::collections::{HashMap, HashSet};

use log::debug;
use ssi_math::Point3;

use crate::couple::{CandidatePair, Contact, SeedPoint};
use crate::mesh::SurfaceMesh;

/// A coarse polyline of chained segment endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionLine {
    /// Points in chain order. A closed line repeats its first point at the end.
    pub points: Vec<SeedPoint>,
    /// First and last points coincide.
    pub closed: bool,
}

/// A patch where the two surfaces are coincident rather than crossing.
#[derive(Debug, Clone, PartialEq)]
pub struct TangentZone {
    /// Member points, without order.
    pub points: Vec<Point3>,
}

/// Output of [`assemble`].
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    /// Section lines.
    pub lines: Vec<SectionLine>,
    /// Point-like contacts not attached to any line.
    pub isolated: Vec<SeedPoint>,
    /// Promoted tangent zones.
    pub tangent_zones: Vec<TangentZone>,
    /// Tangent-candidate clusters below the promotion threshold.
    pub discarded_tangent_zones: usize,
    /// Clusters of circumscribed-only contacts, to be checked for touching points.
    pub near_clusters: Vec<Vec<SeedPoint>>,
}

/// Disjoint-set forest over an index arena. The root of a set is always its
/// smallest member.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    /// `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    /// Add a singleton set and return its index.
    pub fn push(&mut self) -> usize {
        let i = self.parent.len();
        self.parent.push(i);
        i
    }

    /// Representative of the set containing `i`.
    pub fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Merge the sets of `a` and `b`.
    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }

    /// Members grouped by set, each group ascending, groups ordered by root.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..self.parent.len() {
            let r = self.find(i);
            by_root.entry(r).or_default().push(i);
        }
        let mut groups: Vec<_> = by_root.into_values().collect();
        groups.sort_by_key(|g| g[0]);
        groups
    }
}

type CellKey = (i64, i64, i64);

/// Endpoint arena with merge-distance lookup.
struct PointArena {
    points: Vec<SeedPoint>,
    sets: UnionFind,
    cells: HashMap<CellKey, Vec<usize>>,
    merge: f64,
}

impl PointArena {
    fn new(merge: f64) -> Self {
        Self {
            points: Vec::new(),
            sets: UnionFind::new(0),
            cells: HashMap::new(),
            merge: merge.max(f64::MIN_POSITIVE),
        }
    }

    fn key(&self, p: &Point3) -> CellKey {
        let q = |x: f64| (x / self.merge).floor() as i64;
        (q(p.x), q(p.y), q(p.z))
    }

    /// Insert a point and return its node (the root of its merged set).
    fn insert(&mut self, seed: SeedPoint) -> usize {
        let id = self.sets.push();
        self.points.push(seed);
        let (kx, ky, kz) = self.key(&seed.point);
        let merge2 = self.merge * self.merge;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(bucket) = self.cells.get(&(kx + dx, ky + dy, kz + dz)) else {
                        continue;
                    };
                    for &other in bucket {
                        if (self.points[other].point - seed.point).norm_squared() <= merge2 {
                            self.sets.union(id, other);
                        }
                    }
                }
            }
        }
        self.cells.entry((kx, ky, kz)).or_default().push(id);
        self.sets.find(id)
    }

    fn node(&mut self, id: usize) -> usize {
        self.sets.find(id)
    }
}

/// Chain candidate segments and group tangent candidates.
///
/// `merge` is the endpoint merge distance. Tangent zones with fewer than
/// `min_zone_points` distinct points are discarded.
pub fn assemble(
    pairs: &[CandidatePair],
    mesh_a: &SurfaceMesh,
    mesh_b: &SurfaceMesh,
    merge: f64,
    min_zone_points: usize,
) -> Assembly {
    let mut arena = PointArena::new(merge);
    let mut raw_edges = Vec::new();
    let mut point_like = Vec::new();
    let mut tangent = Vec::new();
    let mut near = Vec::new();

    for (i, pair) in pairs.iter().enumerate() {
        match &pair.contact {
            Contact::Segment { start, end } => {
                let a = arena.insert(*start);
                let b = arena.insert(*end);
                raw_edges.push((a, b));
            }
            Contact::Tangent { .. } => tangent.push(i),
            Contact::Near { .. } => near.push(i),
        }
    }

    // Resolve nodes after all insertions: later points may have merged sets.
    let mut edges = Vec::new();
    let mut seen = HashSet::new();
    for (a, b) in raw_edges {
        let (a, b) = (arena.node(a), arena.node(b));
        if a == b {
            point_like.push(a);
            continue;
        }
        let key = (a.min(b), a.max(b));
        if seen.insert(key) {
            edges.push(key);
        }
    }

    let (lines, used) = walk_lines(&arena, &edges);

    let mut isolated = Vec::new();
    let mut isolated_nodes = HashSet::new();
    for node in point_like {
        if !used.contains(&node) && isolated_nodes.insert(node) {
            isolated.push(arena.points[node]);
        }
    }

    let (tangent_zones, discarded) =
        tangent_zones(pairs, &tangent, mesh_a, mesh_b, merge, min_zone_points);
    let near_clusters = cluster(pairs, &near, mesh_a, mesh_b)
        .into_iter()
        .map(|group| {
            group
                .into_iter()
                .filter_map(|i| match &pairs[i].contact {
                    Contact::Near { seed } => Some(*seed),
                    _ => None,
                })
                .collect()
        })
        .collect::<Vec<Vec<SeedPoint>>>();

    debug!(
        "assembly: {} edges -> {} lines, {} isolated, {} tangent zones ({} discarded), {} near clusters",
        edges.len(),
        lines.len(),
        isolated.len(),
        tangent_zones.len(),
        discarded,
        near_clusters.len()
    );

    Assembly {
        lines,
        isolated,
        tangent_zones,
        discarded_tangent_zones: discarded,
        near_clusters,
    }
}

/// Walk the node graph into polylines. Returns the lines and the set of
/// nodes they use.
fn walk_lines(arena: &PointArena, edges: &[(usize, usize)]) -> (Vec<SectionLine>, HashSet<usize>) {
    let n = arena.points.len();
    let mut incident: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (e, &(a, b)) in edges.iter().enumerate() {
        incident[a].push(e);
        incident[b].push(e);
    }
    let mut visited = vec![false; edges.len()];
    let mut used = HashSet::new();
    let mut lines = Vec::new();

    let other = |e: usize, node: usize| {
        let (a, b) = edges[e];
        if a == node {
            b
        } else {
            a
        }
    };

    let walk = |start: usize, first_edge: usize, visited: &mut Vec<bool>| -> Vec<usize> {
        let mut nodes = vec![start];
        let mut cur = start;
        let mut e = first_edge;
        loop {
            visited[e] = true;
            cur = other(e, cur);
            nodes.push(cur);
            if incident[cur].len() != 2 {
                break;
            }
            match incident[cur].iter().copied().find(|&f| !visited[f]) {
                Some(f) => e = f,
                None => break,
            }
        }
        nodes
    };

    // Open chains start at ends and junctions.
    for start in 0..n {
        let degree = incident[start].len();
        if degree == 0 || degree == 2 {
            continue;
        }
        for k in 0..degree {
            let e = incident[start][k];
            if !visited[e] {
                let nodes = walk(start, e, &mut visited);
                lines.push(nodes);
            }
        }
    }
    // What is left are loops.
    for start in 0..n {
        for k in 0..incident[start].len() {
            let e = incident[start][k];
            if !visited[e] {
                let nodes = walk(start, e, &mut visited);
                lines.push(nodes);
            }
        }
    }

    let lines = lines
        .into_iter()
        .map(|nodes| {
            used.extend(nodes.iter().copied());
            let closed = nodes.len() > 2 && nodes.first() == nodes.last();
            SectionLine {
                points: nodes.iter().map(|&i| arena.points[i]).collect(),
                closed,
            }
        })
        .collect();
    (lines, used)
}

/// Group pair indices whose triangles share a vertex in either mesh.
fn cluster(
    pairs: &[CandidatePair],
    members: &[usize],
    mesh_a: &SurfaceMesh,
    mesh_b: &SurfaceMesh,
) -> Vec<Vec<usize>> {
    let mut sets = UnionFind::new(members.len());
    let mut owner_a: HashMap<usize, usize> = HashMap::new();
    let mut owner_b: HashMap<usize, usize> = HashMap::new();
    for (k, &i) in members.iter().enumerate() {
        let pair = &pairs[i];
        for v in mesh_a.triangles[pair.tri_a].vertices {
            match owner_a.get(&v) {
                Some(&o) => sets.union(k, o),
                None => {
                    owner_a.insert(v, k);
                }
            }
        }
        for v in mesh_b.triangles[pair.tri_b].vertices {
            match owner_b.get(&v) {
                Some(&o) => sets.union(k, o),
                None => {
                    owner_b.insert(v, k);
                }
            }
        }
    }
    sets.groups()
        .into_iter()
        .map(|g| g.into_iter().map(|k| members[k]).collect())
        .collect()
}

fn tangent_zones(
    pairs: &[CandidatePair],
    members: &[usize],
    mesh_a: &SurfaceMesh,
    mesh_b: &SurfaceMesh,
    merge: f64,
    min_points: usize,
) -> (Vec<TangentZone>, usize) {
    let mut zones = Vec::new();
    let mut discarded = 0;
    for group in cluster(pairs, members, mesh_a, mesh_b) {
        let mut arena = PointArena::new(merge);
        let mut distinct = Vec::new();
        let mut seen = HashSet::new();
        for &i in &group {
            if let Contact::Tangent { points } = &pairs[i].contact {
                for p in points {
                    let node = arena.insert(*p);
                    if seen.insert(node) {
                        distinct.push(node);
                    }
                }
            }
        }
        // Nodes merged after their first insertion collapse onto the same root.
        let mut roots = HashSet::new();
        let mut kept = Vec::with_capacity(distinct.len());
        for n in distinct {
            if roots.insert(arena.node(n)) {
                kept.push(n);
            }
        }
        let points: Vec<Point3> = kept.into_iter().map(|n| arena.points[n].point).collect();
        if points.len() >= min_points {
            zones.push(TangentZone { points });
        } else {
            discarded += 1;
        }
    }
    (zones, discarded)
}
