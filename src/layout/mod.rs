//! Layout calculators: the policies that turn a controller's physical pad grid into
//! MIDI note indices by way of the current [`Mos`](crate::mos::Mos) scale.
//!
//! Modeled as a tagged variant rather than a trait object — there are exactly three
//! kinds, they don't share state beyond a root coordinate, and the coordinator always
//! knows which one it's holding. Each variant owns its own calculator state (the
//! isomorphic transform, the string row offset, the piano strip geometry) so edits
//! accumulate across recomputations of the same kind, per §4.4's "keep the calculator
//! instance unless kind changes" rule.

mod isomorphic;
mod piano_like;
mod string_like;

use std::collections::HashMap;

use crate::error::LayoutError;
use crate::mos::{IVec2, Mos, Scale};

pub use isomorphic::{Geometry, Isomorphic, IntegerAffine};
pub use piano_like::PianoLike;
pub use string_like::StringLike;

/// A controller pad, identified by its on-surface `(lx, ly)` coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pad {
    pub lx: i32,
    pub ly: i32,
}

/// The current layout policy, holding whichever calculator state applies.
#[derive(Debug, Clone)]
pub enum Layout {
    Isomorphic(Isomorphic),
    StringLike(StringLike),
    PianoLike(PianoLike),
}

impl Layout {
    /// Recompute the full `pad -> scale index` table for every pad the controller
    /// declares, consulting the current scale's `coord_to_scale_index`.
    pub fn calculate_mapping(&mut self, pads: &[Pad], scale: &Scale) -> HashMap<Pad, usize> {
        match self {
            Layout::Isomorphic(calc) => calc.calculate_mapping(pads, scale),
            Layout::StringLike(calc) => calc.calculate_mapping(pads, scale),
            Layout::PianoLike(calc) => calc.calculate_mapping(pads, scale),
        }
    }

    /// Lattice coordinate a given pad currently resolves to, if any — used by
    /// invariant checks and by the `trigger_note` synthetic-event path.
    pub fn get_lattice_coord(&self, pad: Pad) -> Option<IVec2> {
        match self {
            Layout::Isomorphic(calc) => calc.get_lattice_coord(pad),
            Layout::StringLike(calc) => calc.get_lattice_coord(pad),
            Layout::PianoLike(calc) => calc.get_lattice_coord(pad),
        }
    }

    /// Apply a named transformation (e.g. `"shift_left"`, `"skew_right"`) in place.
    pub fn apply_transformation(&mut self, kind: &str) -> Result<(), LayoutError> {
        match self {
            Layout::Isomorphic(calc) => calc.apply_transformation(kind),
            Layout::StringLike(calc) => calc.apply_transformation(kind),
            Layout::PianoLike(calc) => calc.apply_transformation(kind),
        }
    }
}

/// Three-point anchor fit shared by isomorphic initialization and retuning: origin,
/// period-vector, and generator-vector on the lattice side map to three device-space
/// targets built around a root pad. Returns `None` if the rounded linear part isn't
/// unimodular (determinant not `±1`), signaling the caller to keep its previous `M`.
pub(crate) fn fit_unimodular_from_three_anchors(
    lattice_points: [IVec2; 3],
    device_points: [(i32, i32); 3],
) -> Option<IntegerAffine> {
    let src: [(f64, f64); 3] = [
        (lattice_points[0].x as f64, lattice_points[0].y as f64),
        (lattice_points[1].x as f64, lattice_points[1].y as f64),
        (lattice_points[2].x as f64, lattice_points[2].y as f64),
    ];
    let dst: [(f64, f64); 3] = [
        (device_points[0].0 as f64, device_points[0].1 as f64),
        (device_points[1].0 as f64, device_points[1].1 as f64),
        (device_points[2].0 as f64, device_points[2].1 as f64),
    ];
    let affine = crate::mos::affine_from_three_points(src, dst)?;
    let a = affine[0][0].round() as i32;
    let b = affine[0][1].round() as i32;
    let c = affine[1][0].round() as i32;
    let d = affine[1][1].round() as i32;
    let tx = affine[0][2].round() as i32;
    let ty = affine[1][2].round() as i32;
    let candidate = IntegerAffine { a, b, c, d, tx, ty };
    if candidate.det().abs() == 1 {
        Some(candidate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_rejects_non_unimodular_anchors() {
        let lattice = [IVec2::new(0, 0), IVec2::new(2, 0), IVec2::new(0, 2)];
        let device = [(0, 0), (1, 2), (1, 1)];
        // period-vector (2,0) -> (1,2), generator-vector (0,2) -> (1,1): this linear
        // part scales by a non-unit factor, so the fit must be rejected.
        assert!(fit_unimodular_from_three_anchors(lattice, device).is_none());
    }
}
