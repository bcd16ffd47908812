//! Crossing classification of an intersection line.
//!
//! A [`Transition`] describes how the line behaves at one point with respect
//! to one surface (or one boundary arc): it enters, leaves, touches without
//! crossing, or cannot be classified.

use ssi_geom::LoopOrientation;
use ssi_math::{cross_2d, Dir3, Vec2, Vec3};

/// Side of a touching contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchSide {
    /// The rest of the line stays inside.
    Inside,
    /// The rest of the line stays outside.
    Outside,
    /// Not determined.
    Unknown,
}

/// Crossing state of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// From outside to inside.
    In,
    /// From inside to outside.
    Out,
    /// Touches without crossing.
    Touch {
        /// Which side the line stays on.
        side: TouchSide,
        /// The local orientations of the two surfaces are reversed.
        opposite: bool,
    },
    /// Not enough local information; treat as a potential crossing.
    Undecided,
}

/// Crossing state plus a flag for non-transversal crossings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Crossing state.
    pub kind: TransitionKind,
    /// The crossing is locally non-transversal.
    pub tangent: bool,
}

impl Default for Transition {
    fn default() -> Self {
        Self::undecided()
    }
}

impl Transition {
    /// Transversal entry.
    pub fn entering() -> Self {
        Self {
            kind: TransitionKind::In,
            tangent: false,
        }
    }

    /// Transversal exit.
    pub fn leaving() -> Self {
        Self {
            kind: TransitionKind::Out,
            tangent: false,
        }
    }

    /// Tangent touch.
    pub fn touch(side: TouchSide, opposite: bool) -> Self {
        Self {
            kind: TransitionKind::Touch { side, opposite },
            tangent: true,
        }
    }

    /// Unclassified.
    pub fn undecided() -> Self {
        Self {
            kind: TransitionKind::Undecided,
            tangent: false,
        }
    }

    /// Same state with the tangent flag set to `tangent`.
    pub fn with_tangent(mut self, tangent: bool) -> Self {
        self.tangent = tangent;
        self
    }

    /// Returns true for `In` or `Out`.
    pub fn is_crossing(&self) -> bool {
        matches!(self.kind, TransitionKind::In | TransitionKind::Out)
    }

    /// Returns true for `Touch`.
    pub fn is_touch(&self) -> bool {
        matches!(self.kind, TransitionKind::Touch { .. })
    }

    /// Returns true for `Undecided`.
    pub fn is_undecided(&self) -> bool {
        matches!(self.kind, TransitionKind::Undecided)
    }

    /// The transition seen when the line is traversed backwards.
    ///
    /// `In` and `Out` swap, `Touch` keeps its side and flips `opposite`,
    /// `Undecided` is unchanged. Applying it twice is the identity.
    pub fn reversed(self) -> Self {
        let kind = match self.kind {
            TransitionKind::In => TransitionKind::Out,
            TransitionKind::Out => TransitionKind::In,
            TransitionKind::Touch { side, opposite } => TransitionKind::Touch {
                side,
                opposite: !opposite,
            },
            TransitionKind::Undecided => TransitionKind::Undecided,
        };
        Self {
            kind,
            tangent: self.tangent,
        }
    }

    /// In-place form of [`Transition::reversed`].
    pub fn reverse(&mut self) {
        *self = self.reversed();
    }
}

/// Line transitions on surface 1 and surface 2 at a point with line tangent
/// `tangent`, plus whether the surfaces are tangent there.
///
/// With `m = n1 × n2`, the line is `In` on surface 1 when `tangent · m > 0`
/// and `Out` otherwise; surface 2 gets the opposite. When the normals are
/// parallel within `tangent_angle` both transitions are tangent touches.
/// A missing normal or a vanishing tangent gives `Undecided`.
pub fn line_transitions(
    tangent: &Vec3,
    n1: Option<Dir3>,
    n2: Option<Dir3>,
    tangent_angle: f64,
) -> (Transition, Transition, bool) {
    let (Some(n1), Some(n2)) = (n1, n2) else {
        return (Transition::undecided(), Transition::undecided(), false);
    };
    let m = n1.cross(n2.as_ref());
    if m.norm() <= tangent_angle.sin() {
        let opposite = n1.dot(n2.as_ref()) < 0.0;
        let t = Transition::touch(TouchSide::Unknown, opposite);
        return (t, t, true);
    }
    let t_len = tangent.norm();
    if t_len <= f64::MIN_POSITIVE {
        return (Transition::undecided(), Transition::undecided(), false);
    }
    let s = tangent.dot(&m) / (t_len * m.norm());
    if s.abs() <= 1e-9 {
        return (Transition::undecided(), Transition::undecided(), false);
    }
    if s > 0.0 {
        (Transition::entering(), Transition::leaving(), false)
    } else {
        (Transition::leaving(), Transition::entering(), false)
    }
}

/// Transition of a line crossing a boundary arc, in parameter space.
///
/// `line_dir` is the line's parameter-space tangent, `arc_dir` the arc
/// tangent. Material lies left of outer-loop arcs and right of inner-loop
/// arcs; a line heading into material is `In`. A line running along the arc
/// (angle below `tangent_angle`) touches it. Zero tangents give `Undecided`.
pub fn arc_transition(
    line_dir: &Vec2,
    arc_dir: &Vec2,
    orientation: LoopOrientation,
    tangent_angle: f64,
) -> Transition {
    let (ll, la) = (line_dir.norm(), arc_dir.norm());
    if ll <= f64::MIN_POSITIVE || la <= f64::MIN_POSITIVE {
        return Transition::undecided();
    }
    let sin = cross_2d(arc_dir, line_dir) / (ll * la);
    if sin.abs() <= tangent_angle.sin() {
        // Parallel to the arc: the side is known from the loop role only.
        let opposite = arc_dir.dot(line_dir) < 0.0;
        return Transition::touch(TouchSide::Unknown, opposite);
    }
    let into_left = sin > 0.0;
    if into_left == orientation.material_on_left() {
        Transition::entering()
    } else {
        Transition::leaving()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_transitions() -> Vec<Transition> {
        let mut v = vec![
            Transition::entering(),
            Transition::leaving(),
            Transition::undecided(),
            Transition::entering().with_tangent(true),
        ];
        for side in [TouchSide::Inside, TouchSide::Outside, TouchSide::Unknown] {
            for opposite in [false, true] {
                v.push(Transition::touch(side, opposite));
                v.push(Transition::touch(side, opposite).with_tangent(false));
            }
        }
        v
    }

    #[test]
    fn test_reverse_is_self_inverse() {
        for t in all_transitions() {
            assert_eq!(t.reversed().reversed(), t);
        }
    }

    #[test]
    fn test_reverse_rules() {
        assert_eq!(Transition::entering().reversed(), Transition::leaving());
        assert_eq!(Transition::leaving().reversed(), Transition::entering());
        assert_eq!(Transition::undecided().reversed(), Transition::undecided());
        let t = Transition::touch(TouchSide::Inside, false).reversed();
        assert_eq!(
            t.kind,
            TransitionKind::Touch {
                side: TouchSide::Inside,
                opposite: true
            }
        );
        assert!(t.tangent);
        let mut u = Transition::entering().with_tangent(true);
        u.reverse();
        assert_eq!(u.kind, TransitionKind::Out);
        assert!(u.tangent);
    }

    #[test]
    fn test_line_transitions_transversal() {
        let n1 = Some(Dir3::new_normalize(Vec3::z()));
        let n2 = Some(Dir3::new_normalize(Vec3::x()));
        // n1 × n2 = +y
        let (t1, t2, tangent) = line_transitions(&Vec3::y(), n1, n2, 1e-3);
        assert_eq!(t1.kind, TransitionKind::In);
        assert_eq!(t2.kind, TransitionKind::Out);
        assert!(!tangent);
        let (t1, t2, _) = line_transitions(&-Vec3::y(), n1, n2, 1e-3);
        assert_eq!(t1.kind, TransitionKind::Out);
        assert_eq!(t2.kind, TransitionKind::In);
        // Swapping the surfaces swaps the roles.
        let (s1, s2, _) = line_transitions(&Vec3::y(), n2, n1, 1e-3);
        assert_eq!((s1, s2), (Transition::leaving(), Transition::entering()));
    }

    #[test]
    fn test_line_transitions_tangent_and_singular() {
        let n = Some(Dir3::new_normalize(Vec3::z()));
        let m = Some(Dir3::new_normalize(-Vec3::z()));
        let (t1, t2, tangent) = line_transitions(&Vec3::x(), n, m, 1e-3);
        assert!(tangent);
        assert!(t1.is_touch() && t2.is_touch() && t1.tangent);
        assert_eq!(
            t1.kind,
            TransitionKind::Touch {
                side: TouchSide::Unknown,
                opposite: true
            }
        );
        let (t1, _, _) = line_transitions(&Vec3::x(), None, n, 1e-3);
        assert!(t1.is_undecided());
    }

    #[test]
    fn test_arc_transition_outer_and_inner() {
        // Arc along +x: material of an outer loop is at +y.
        let arc = Vec2::x();
        let up = Vec2::y();
        let t = arc_transition(&up, &arc, LoopOrientation::Outer, 1e-6);
        assert_eq!(t.kind, TransitionKind::In);
        let t = arc_transition(&-up, &arc, LoopOrientation::Outer, 1e-6);
        assert_eq!(t.kind, TransitionKind::Out);
        // Inner loops reverse the sense.
        let t = arc_transition(&up, &arc, LoopOrientation::Inner, 1e-6);
        assert_eq!(t.kind, TransitionKind::Out);
        // Running along the arc.
        let t = arc_transition(&Vec2::x(), &arc, LoopOrientation::Outer, 1e-6);
        assert!(t.is_touch());
        let t = arc_transition(&Vec2::zeros(), &arc, LoopOrientation::Outer, 1e-6);
        assert!(t.is_undecided());
    }
}
