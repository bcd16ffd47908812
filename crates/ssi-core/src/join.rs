//! Joining walking lines at their free ends.
//!
//! Trimming, junctions in the section graph and missed mesh contacts can cut
//! one intersection branch into several open lines. Two lines are joined
//! when a free end of each (an end that is not a boundary crossing or a
//! caller vertex) meets the other within the tolerance and the lines carry
//! on in the same direction. Ends that stop short of each other are bridged
//! through a refined midpoint when the gap is small and the two ends face
//! each other within [`MAX_BRIDGE_ANGLE`].

use log::debug;
use ssi_math::Vec3;

use crate::point::IntersectionPoint;
use crate::wline::WLine;

/// Largest angle between the end directions of two lines that may be
/// joined, and between either direction and the gap.
pub const MAX_BRIDGE_ANGLE: f64 = std::f64::consts::FRAC_PI_6;

/// A gap is bridged only when it is at most this many end segments long.
const MAX_GAP_SEGMENTS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    First,
    Last,
}

/// A joinable pair: line `a` at `end_a` continues into line `b` at `end_b`.
#[derive(Debug, Clone)]
struct Junction {
    a: usize,
    end_a: End,
    b: usize,
    end_b: End,
    bridge: Option<IntersectionPoint>,
    /// Cosine between the outward direction of `a` and the inward one of `b`.
    alignment: f64,
}

/// End point of `line` and the outward direction of its last segment.
fn free_end(line: &WLine, end: End) -> Option<(&IntersectionPoint, Vec3)> {
    let n = line.nb_pnts();
    if n < 2 || line.is_closed() {
        return None;
    }
    let (marker, tip, inner) = match end {
        End::First => (line.first_marker(), 0, 1),
        End::Last => (line.last_marker(), n - 1, n - 2),
    };
    if marker.is_some_and(|m| m.genuine) {
        return None;
    }
    let out = line.point(tip).point - line.point(inner).point;
    (out.norm() > 0.0).then(|| (line.point(tip), out))
}

/// Join lines whose free ends meet, bridging aligned gaps with `bridge`.
///
/// `bridge(a, b)` returns an intersection point between end `a` and end `b`
/// classified for travel from `a` to `b`, or `None` if the gap is not part
/// of the intersection. Joins are made best-aligned first until no pair is
/// left.
pub fn join_lines<F>(mut lines: Vec<WLine>, tol: f64, bridge_point: F) -> Vec<WLine>
where
    F: Fn(&IntersectionPoint, &IntersectionPoint) -> Option<IntersectionPoint>,
{
    let cos_limit = MAX_BRIDGE_ANGLE.cos();
    let mut joins = 0;
    loop {
        let mut best: Option<Junction> = None;
        for a in 0..lines.len() {
            for b in a + 1..lines.len() {
                for end_a in [End::First, End::Last] {
                    for end_b in [End::First, End::Last] {
                        let (Some((pa, out_a)), Some((pb, out_b))) =
                            (free_end(&lines[a], end_a), free_end(&lines[b], end_b))
                        else {
                            continue;
                        };
                        let alignment = -out_a.dot(&out_b) / (out_a.norm() * out_b.norm());
                        if alignment < cos_limit
                            || best.as_ref().is_some_and(|j| j.alignment >= alignment)
                        {
                            continue;
                        }
                        let gap = pb.point - pa.point;
                        let dist = gap.norm();
                        let bridge = if dist <= tol.max(pa.tolerance).max(pb.tolerance) {
                            None
                        } else {
                            let reach = MAX_GAP_SEGMENTS * out_a.norm().max(out_b.norm());
                            let facing = gap.dot(&out_a) >= cos_limit * dist * out_a.norm()
                                && -gap.dot(&out_b) >= cos_limit * dist * out_b.norm();
                            if dist > reach || !facing {
                                continue;
                            }
                            let Some(m) = bridge_point(pa, pb) else {
                                continue;
                            };
                            Some(m)
                        };
                        best = Some(Junction {
                            a,
                            end_a,
                            b,
                            end_b,
                            bridge,
                            alignment,
                        });
                    }
                }
            }
        }
        let Some(j) = best else {
            break;
        };
        let b = lines.remove(j.b);
        let a = lines.remove(j.a);
        lines.insert(j.a, splice(a, j.end_a, b, j.end_b, j.bridge, tol));
        joins += 1;
    }
    if joins > 0 {
        debug!("joined {} line ends, {} lines left", joins, lines.len());
    }
    lines
}

/// Concatenate `a` and `b` so that `a`'s `end_a` runs into `b`'s `end_b`,
/// through `bridge` when given. `bridge` is classified for travel from `a`
/// to `b`.
fn splice(
    mut a: WLine,
    end_a: End,
    mut b: WLine,
    end_b: End,
    mut bridge: Option<IntersectionPoint>,
    tol: f64,
) -> WLine {
    // Reverse as little as possible: `a` must end where `b` starts.
    let (a, b) = match (end_a, end_b) {
        (End::Last, End::First) => (a, b),
        (End::First, End::Last) => {
            if let Some(p) = bridge.as_mut() {
                p.reverse_transition();
            }
            (b, a)
        }
        (End::First, End::First) => {
            a.reverse();
            (a, b)
        }
        (End::Last, End::Last) => {
            b.reverse();
            (a, b)
        }
    };
    let periods1 = a.periods_s1();
    let periods2 = a.periods_s2();

    let mut points: Vec<IntersectionPoint> = a.points().to_vec();
    // Without a bridge the first point of `b` repeats the last of `a`.
    let tail = usize::from(bridge.is_none());
    let offset = (points.len() + 1 - 2 * tail) as f64;
    for mut p in bridge.into_iter().chain(b.points()[tail..].iter().cloned()) {
        if let Some(prev) = points.last() {
            p.uv1 = periods1.adjust(p.uv1, prev.uv1);
            p.uv2 = periods2.adjust(p.uv2, prev.uv2);
        }
        points.push(p);
    }

    let mut line = WLine::new(
        points,
        a.is_tangent_line() && b.is_tangent_line(),
        periods1,
        periods2,
    );
    line.set_creation_way(a.creation_way());
    line.set_purger_allowed(a.is_purger_allowed() && b.is_purger_allowed());
    if let Some(arc) = a.arc_on_s1().or(b.arc_on_s1()) {
        line.set_arc_on_s1(arc);
    }
    if let Some(arc) = a.arc_on_s2().or(b.arc_on_s2()) {
        line.set_arc_on_s2(arc);
    }

    // The two free end vertices at the junction are dropped.
    let joint_a = a.last_marker().map(|m| m.index);
    let joint_b = b.first_marker().map(|m| m.index);
    for (i, v) in a.vertices().iter().enumerate() {
        if Some(i) != joint_a {
            line.add_vertex(v.clone());
        }
    }
    for (i, v) in b.vertices().iter().enumerate() {
        if Some(i) != joint_b {
            let mut v = v.clone();
            v.param_on_line += offset;
            line.add_vertex(v);
        }
    }
    // Vertices of `a` come first, in line order.
    if let Some(last) = line.nb_vertex().checked_sub(1) {
        if let Some(m) = a.first_marker() {
            line.set_first_point(0, m.genuine);
        }
        if let Some(m) = b.last_marker() {
            line.set_last_point(last, m.genuine);
        }
    }
    line.compute_vertex_parameters(tol, false);
    line
}
