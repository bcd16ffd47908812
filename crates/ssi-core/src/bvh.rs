//! Bounding Volume Hierarchy over mesh triangles.
//!
//! Uses Surface Area Heuristic (SAH) for construction. Queries return the
//! triangle indices whose boxes overlap the query box, in ascending order.

use ssi_math::Point3;

use crate::bbox::Aabb3;

const LEAF_SIZE: usize = 4;
const NUM_BUCKETS: usize = 12;

/// A BVH node - either a leaf containing triangles or an internal node with children.
#[derive(Debug, Clone)]
enum BvhNode {
    Leaf {
        aabb: Aabb3,
        items: Vec<(usize, Aabb3)>,
    },
    Internal {
        aabb: Aabb3,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    fn aabb(&self) -> &Aabb3 {
        match self {
            BvhNode::Leaf { aabb, .. } | BvhNode::Internal { aabb, .. } => aabb,
        }
    }
}

/// Box tree over indexed items (triangles of one mesh).
#[derive(Debug, Clone)]
pub struct TriangleBvh {
    root: Option<BvhNode>,
    len: usize,
}

impl TriangleBvh {
    /// Build the tree from `(index, box)` pairs.
    pub fn build(boxes: Vec<(usize, Aabb3)>) -> Self {
        let mut data: Vec<(usize, Aabb3, Point3)> = boxes
            .into_iter()
            .map(|(i, aabb)| (i, aabb, aabb.centroid()))
            .collect();
        let len = data.len();
        let root = if data.is_empty() {
            None
        } else {
            Some(build_node(&mut data))
        };
        Self { root, len }
    }

    /// Number of items in the tree.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the tree holds no items.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Indices of all items whose box overlaps `query`, sorted ascending.
    pub fn query(&self, query: &Aabb3) -> Vec<usize> {
        let mut out = Vec::new();
        if let Some(ref root) = self.root {
            query_node(root, query, &mut out);
        }
        out.sort_unstable();
        out
    }
}

fn query_node(node: &BvhNode, query: &Aabb3, out: &mut Vec<usize>) {
    if !node.aabb().overlaps(query) {
        return;
    }
    match node {
        BvhNode::Leaf { items, .. } => out.extend(
            items
                .iter()
                .filter(|(_, aabb)| aabb.overlaps(query))
                .map(|(i, _)| *i),
        ),
        BvhNode::Internal { left, right, .. } => {
            query_node(left, query, out);
            query_node(right, query, out);
        }
    }
}

/// Build a BVH node recursively using SAH.
fn build_node(data: &mut [(usize, Aabb3, Point3)]) -> BvhNode {
    let mut bounds = Aabb3::empty();
    for (_, aabb, _) in data.iter() {
        bounds.include_box(aabb);
    }

    if data.len() <= LEAF_SIZE {
        return BvhNode::Leaf {
            aabb: bounds,
            items: data.iter().map(|(i, aabb, _)| (*i, *aabb)).collect(),
        };
    }

    let mid = match find_best_split(data, &bounds) {
        Some((axis, pos)) => partition(data, axis, pos),
        None => 0,
    };
    // Fall back to a median split when SAH finds nothing useful.
    let mid = if mid == 0 || mid == data.len() {
        data.len() / 2
    } else {
        mid
    };

    let (left, right) = data.split_at_mut(mid);
    BvhNode::Internal {
        aabb: bounds,
        left: Box::new(build_node(left)),
        right: Box::new(build_node(right)),
    }
}

/// Find the best split axis and position using SAH.
fn find_best_split(data: &[(usize, Aabb3, Point3)], bounds: &Aabb3) -> Option<(usize, f64)> {
    let extent = bounds.extent();
    let total_area = bounds.surface_area();
    let mut best: Option<(f64, usize, f64)> = None;

    for axis in 0..3 {
        let axis_extent = extent[axis];
        if axis_extent < 1e-10 {
            continue;
        }
        let axis_min = bounds.min[axis];

        let mut bucket_counts = [0usize; NUM_BUCKETS];
        let mut bucket_bounds = [Aabb3::empty(); NUM_BUCKETS];
        for (_, aabb, centroid) in data {
            let b = ((centroid[axis] - axis_min) / axis_extent * NUM_BUCKETS as f64) as usize;
            let b = b.min(NUM_BUCKETS - 1);
            bucket_counts[b] += 1;
            bucket_bounds[b].include_box(aabb);
        }

        for split in 1..NUM_BUCKETS {
            let mut left_count = 0;
            let mut left_bounds = Aabb3::empty();
            for i in 0..split {
                left_count += bucket_counts[i];
                left_bounds.include_box(&bucket_bounds[i]);
            }
            let mut right_count = 0;
            let mut right_bounds = Aabb3::empty();
            for i in split..NUM_BUCKETS {
                right_count += bucket_counts[i];
                right_bounds.include_box(&bucket_bounds[i]);
            }
            if left_count == 0 || right_count == 0 {
                continue;
            }

            // traversal + P(left) * N_left + P(right) * N_right
            let cost = if total_area > 0.0 {
                0.125
                    + left_bounds.surface_area() / total_area * left_count as f64
                    + right_bounds.surface_area() / total_area * right_count as f64
            } else {
                (left_count.max(right_count)) as f64
            };

            if best.map_or(true, |(c, _, _)| cost < c) {
                let pos = axis_min + (split as f64 / NUM_BUCKETS as f64) * axis_extent;
                best = Some((cost, axis, pos));
            }
        }
    }

    best.map(|(_, axis, pos)| (axis, pos))
}

/// Partition items by centroid along an axis.
fn partition(data: &mut [(usize, Aabb3, Point3)], axis: usize, pos: f64) -> usize {
    let mut left = 0;
    let mut right = data.len();
    while left < right {
        if data[left].2[axis] < pos {
            left += 1;
        } else {
            right -= 1;
            data.swap(left, right);
        }
    }
    left
}
