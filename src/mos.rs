//! Moment-of-symmetry scale construction.
//!
//! A [`Mos`] describes a two-step (large/small) scale generated by stacking a generator
//! interval inside a period, built by refining a Stern-Brocot mediant walk to a given
//! `depth`. A node's natural coordinate `(cx, cy)` is the generator chain position: the
//! generator vector (expressed in the primitive large/small step basis) stacked `k`
//! times, unreduced. `cx`/`cy` grow without bound as the chain is walked further from
//! the root, the same way a Wicki-Hayden-style isomorphic keyboard's two axes (fifths,
//! octaves) are unbounded chain coordinates rather than a value reduced into some
//! fundamental domain.
//!
//! `depth = 1` is the degenerate case: no mediant refinement has happened yet, so the
//! generator coincides with one of the two primitive unit steps and the period is the
//! trivial `(1, 1)`. The chain still walks out to a distinct coordinate per step, so this
//! is the MOS equivalent of a flat chromatic scale, not a collapse onto a single point.

use std::collections::HashMap;

/// An integer vector in natural (large-step, small-step) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IVec2 {
    pub x: i32,
    pub y: i32,
}

impl IVec2 {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::ops::Add for IVec2 {
    type Output = IVec2;
    fn add(self, rhs: IVec2) -> IVec2 {
        IVec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

/// A two-step moment-of-symmetry scale structure.
///
/// Fields named after `scalatrix`'s own `Mos` accessors (`a`, `b`, `a0`, `b0`, `n0`,
/// `n_large`, `n_small`, `large_vec`, `generator_vec`) so call sites that have read the
/// upstream Python/FFI original will recognize the shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mos {
    pub depth: u32,
    pub mode: i32,
    pub repetitions: u32,
    /// Large steps per period.
    pub n_large: u32,
    /// Small steps per period.
    pub n_small: u32,
    /// Generator's expansion in large steps.
    pub a: i32,
    /// Generator's expansion in small steps.
    pub b: i32,
    /// The Stern-Brocot parent one level up, used by the piano-like accidental formula.
    pub a0: i32,
    pub b0: i32,
    pub n0: i32,
    /// Unit large-step vector, always `(1, 0)`.
    pub large_vec: IVec2,
    /// Unit small-step vector, always `(0, 1)`.
    pub small_vec: IVec2,
    /// `n_large * large_vec + n_small * small_vec`.
    pub period_vec: IVec2,
    /// `a * large_vec + b * small_vec`, reduced to be coprime with the period.
    pub generator_vec: IVec2,
}

impl Mos {
    /// Build a MOS by refining a Stern-Brocot mediant walk `depth` levels deep.
    ///
    /// At each level, bit `level` of `mode` chooses which of the two running parents
    /// (`left`, `right`) is replaced by their mediant; after `depth` levels the final
    /// mediant is the period, and the smaller of the two surviving parents (by total
    /// step count) is taken as the generator, made coprime with the period via the same
    /// reasoning `IsomorphicKeyboard::coprime` uses for keyboard step sizes: nudge the
    /// larger share down until `gcd(a, n_large) == gcd(b, n_small) == 1` wherever that
    /// axis is nontrivial.
    ///
    /// `skew`, `stretch` and `repetitions` don't affect the lattice structure itself —
    /// they're folded into the affine fit in [`Tuning::recalculate`] — but are carried
    /// on the struct for bookkeeping and descriptor round-tripping.
    pub fn from_generator(depth: u32, mode: i32, repetitions: u32) -> Self {
        let depth = depth.max(1);
        let mut left = (0u32, 1u32);
        let mut right = (1u32, 0u32);
        for level in 0..depth - 1 {
            let mediant = (left.0 + right.0, left.1 + right.1);
            if (mode >> level) & 1 == 1 {
                left = mediant;
            } else {
                right = mediant;
            }
        }
        let period = (left.0 + right.0, left.1 + right.1);
        let (parent, other) = if left.0 + left.1 <= right.0 + right.1 {
            (left, right)
        } else {
            (right, left)
        };

        let n_large = period.0;
        let n_small = period.1;
        let (a, b) = coprime_generator(parent.0 as i32, parent.1 as i32, n_large as i32, n_small as i32);

        Mos {
            depth,
            mode,
            repetitions: repetitions.max(1),
            n_large,
            n_small,
            a,
            b,
            a0: other.0 as i32,
            b0: other.1 as i32,
            n0: other.0 as i32 + other.1 as i32,
            large_vec: IVec2::new(1, 0),
            small_vec: IVec2::new(0, 1),
            period_vec: IVec2::new(n_large as i32, n_small as i32),
            generator_vec: IVec2::new(a, b),
        }
    }

    /// Total steps in one period.
    pub fn n(&self) -> u32 {
        self.n_large + self.n_small
    }

    /// Natural coordinate of genchain position `k` (may be negative): the generator
    /// vector stacked `k` times, unreduced. Distinct `k` always give distinct
    /// coordinates, since `(a, b) != (0, 0)` always holds — reducing each axis modulo
    /// `n_large`/`n_small` independently (an earlier version of this routine did that)
    /// collapses every `k` onto a single point whenever an axis count is `1`, which is
    /// exactly the `depth = 1` case.
    pub fn node_coord(&self, k: i32) -> IVec2 {
        IVec2::new(k * self.a, k * self.b)
    }
}

fn gcd(a: i32, b: i32) -> i32 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Nudge `(a, b)` toward coprimality with `(n_large, n_small)` on whichever axis is
/// nontrivial, mirroring `IsomorphicKeyboard::coprime`'s "shrink the sharp value"
/// strategy but applied per axis instead of to a single step size.
///
/// A parent component that's already `0` (the `depth = 1` base case, where one of the
/// two primitive unit steps is literally `(0, 1)` or `(1, 0)`) is left alone: `gcd(0, n)
/// == n`, coprime only when `n == 1`, which is exactly when leaving it at `0` is
/// correct — forcing it up to `1` would make the generator coincide with the period.
fn coprime_generator(mut a: i32, mut b: i32, n_large: i32, n_small: i32) -> (i32, i32) {
    if n_large > 0 {
        while gcd(a, n_large) != 1 && a > 1 {
            a -= 1;
        }
    }
    if n_small > 0 {
        while gcd(b, n_small) != 1 && b > 1 {
            b -= 1;
        }
    }
    (a, b)
}

/// Solve for the 2x3 affine matrix `[[a, b, tx], [c, d, ty]]` mapping each `src[i]` to
/// `dst[i]` exactly, via a 3x3 linear solve (Cramer's rule) shared by both output rows.
///
/// Mirrors `affineFromThreeDots` in the original tuning engine: three point
/// correspondences fully determine a 2-D affine map (6 equations, 6 unknowns).
/// Returns `None` if the three source points are collinear (singular system).
pub fn affine_from_three_points(src: [(f64, f64); 3], dst: [(f64, f64); 3]) -> Option<[[f64; 3]; 2]> {
    let m = [
        [src[0].0, src[0].1, 1.0],
        [src[1].0, src[1].1, 1.0],
        [src[2].0, src[2].1, 1.0],
    ];
    let det = det3(&m);
    if det.abs() < 1e-9 {
        return None;
    }
    let row = |target: [f64; 3]| -> [f64; 3] {
        let mx = replace_col(&m, 0, target);
        let my = replace_col(&m, 1, target);
        let mz = replace_col(&m, 2, target);
        [det3(&mx) / det, det3(&my) / det, det3(&mz) / det]
    };
    let top = row([dst[0].0, dst[1].0, dst[2].0]);
    let bottom = row([dst[0].1, dst[1].1, dst[2].1]);
    Some([top, bottom])
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn replace_col(m: &[[f64; 3]; 3], col: usize, values: [f64; 3]) -> [[f64; 3]; 3] {
    let mut out = *m;
    for row in 0..3 {
        out[row][col] = values[row];
    }
    out
}

pub fn apply_affine(affine: &[[f64; 3]; 2], point: (f64, f64)) -> (f64, f64) {
    let x = affine[0][0] * point.0 + affine[0][1] * point.1 + affine[0][2];
    let y = affine[1][0] * point.0 + affine[1][1] * point.1 + affine[1][2];
    (x, y)
}

/// A single enumerated scale node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub natural_coord: IVec2,
    pub degree: i32,
    pub frequency_hz: f64,
}

/// The full tuning state: a constructed (or chromatic-fallback) MOS, the affine map
/// from lattice space to logical space, and the enumerated nodes in MIDI range.
#[derive(Debug, Clone)]
pub struct Scale {
    pub mos: Mos,
    pub nodes: Vec<Node>,
    pub coord_to_scale_index: HashMap<(i32, i32), usize>,
}

/// Half-width of the genchain window enumerated around the root index. Each genchain
/// step advances the logical y-coordinate by exactly `1/steps` regardless of `steps`
/// itself (the anchor fit below is built so the generator anchor is always one
/// `1/steps` above the origin anchor), so a fixed radius here — independent of the
/// tuning's `steps` field — comfortably covers MIDI 0-127 around `ROOT_INDEX` for any
/// `mode_offset` in the range real descriptors use.
const GENCHAIN_RADIUS: i32 = 80;

/// MIDI note index a genchain position of `0` with `mode_offset = 0` lands closest to.
const ROOT_INDEX: i32 = 60;

impl Scale {
    /// Build the scale from tuning parameters, matching `TuningState.recalculate` in
    /// the original engine: construct the MOS, fit a three-anchor affine from lattice
    /// space to logical (octave-fraction) space, then enumerate genchain positions
    /// across a fixed window centered on [`ROOT_INDEX`] into nodes with a frequency
    /// derived from the logical y-coordinate.
    ///
    /// The window is sized independently of `steps`: `steps` only controls how finely
    /// one period is divided for the frequency calculation, not how many MIDI-range
    /// nodes get enumerated. Enumerating `0..steps` nodes instead (an earlier version
    /// of this routine did that) caps `coord_to_scale_index` at `steps` entries, which
    /// starves any layout whose pad-to-index table needs indices beyond that.
    pub fn recalculate(
        depth: u32,
        mode: i32,
        root_freq: f64,
        stretch: f64,
        skew: f64,
        mode_offset: i32,
        steps: i64,
        repetitions: u32,
    ) -> Self {
        let steps = steps.max(1);
        let mos = Mos::from_generator(depth, mode, repetitions);

        let src = [
            (0.0, 0.0),
            (mos.generator_vec.x as f64, mos.generator_vec.y as f64),
            (mos.period_vec.x as f64, mos.period_vec.y as f64),
        ];
        let dst = [
            (0.0, (mode_offset as f64 + 0.5) / steps as f64),
            (skew * stretch, (mode_offset as f64 + 1.5) / steps as f64),
            (stretch, (mode_offset as f64 + 0.5) / steps as f64),
        ];
        let affine = affine_from_three_points(src, dst).unwrap_or([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);

        let mut nodes = Vec::new();
        let mut coord_to_scale_index = HashMap::new();
        for k in -GENCHAIN_RADIUS..=GENCHAIN_RADIUS {
            let coord = mos.node_coord(k);
            let (_, logical_y) = apply_affine(&affine, (coord.x as f64, coord.y as f64));
            let degree = (logical_y * steps as f64).round() as i32;
            let index = degree + ROOT_INDEX;
            if !(0..128).contains(&index) {
                continue;
            }
            let frequency_hz = root_freq * 2f64.powf(degree as f64 / steps as f64);
            coord_to_scale_index.entry((coord.x, coord.y)).or_insert(index as usize);
            nodes.push(Node { natural_coord: coord, degree, frequency_hz });
        }

        Scale { mos, nodes, coord_to_scale_index }
    }

    pub fn coord_to_index(&self, coord: IVec2) -> Option<usize> {
        self.coord_to_scale_index.get(&(coord.x, coord.y)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_one_is_two_primitive_steps() {
        let mos = Mos::from_generator(1, 0, 1);
        assert_eq!(mos.n_large + mos.n_small, mos.n());
        assert!(mos.n_large >= 1 || mos.n_small >= 1);
    }

    #[test]
    fn generator_is_coprime_with_nontrivial_axes() {
        for depth in 1..8 {
            for mode in 0..4 {
                let mos = Mos::from_generator(depth, mode, 1);
                if mos.n_large > 0 {
                    assert_eq!(gcd(mos.a, mos.n_large as i32), 1);
                }
                if mos.n_small > 0 {
                    assert_eq!(gcd(mos.b, mos.n_small as i32), 1);
                }
            }
        }
    }

    #[test]
    fn affine_fit_reproduces_anchor_points() {
        let src = [(0.0, 0.0), (1.0, 1.0), (2.0, 0.0)];
        let dst = [(0.0, 0.0), (1.0, 2.0), (3.0, 1.0)];
        let affine = affine_from_three_points(src, dst).expect("non-degenerate");
        for (s, d) in src.iter().zip(dst.iter()) {
            let (x, y) = apply_affine(&affine, *s);
            assert!((x - d.0).abs() < 1e-6);
            assert!((y - d.1).abs() < 1e-6);
        }
    }

    #[test]
    fn collinear_anchors_return_none() {
        let src = [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)];
        let dst = [(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)];
        assert!(affine_from_three_points(src, dst).is_none());
    }

    #[test]
    fn scale_window_is_independent_of_steps_and_bounded_to_midi_range() {
        let twelve = Scale::recalculate(3, 0b101, 261.63, 1.0, 0.0, 0, 12, 1);
        let thirty_one = Scale::recalculate(3, 0b101, 261.63, 1.0, 0.0, 0, 31, 1);
        assert!(twelve.coord_to_scale_index.values().all(|&idx| idx <= 127));
        assert!(thirty_one.coord_to_scale_index.values().all(|&idx| idx <= 127));
        // changing `steps` alone shouldn't shrink the enumerated window down to `steps` entries
        assert!(twelve.nodes.len() > 12);
        assert!(thirty_one.nodes.len() > 31);
    }

    #[test]
    fn depth_one_chromatic_fills_most_of_the_midi_range() {
        let scale = Scale::recalculate(1, 0, 261.63, 1.0, 0.0, 0, 12, 1);
        assert!(
            scale.coord_to_scale_index.len() >= 120,
            "expected near-full MIDI coverage for a flat chromatic tuning, got {}",
            scale.coord_to_scale_index.len()
        );
    }

    #[test]
    fn depth_one_node_coord_does_not_collapse_to_a_single_point() {
        let mos = Mos::from_generator(1, 0, 1);
        let coords: std::collections::HashSet<(i32, i32)> =
            (0..16).map(|k| { let c = mos.node_coord(k); (c.x, c.y) }).collect();
        assert_eq!(coords.len(), 16, "every genchain position should land on a distinct coordinate");
    }

    #[test]
    fn frequencies_are_monotonic_with_degree() {
        let scale = Scale::recalculate(2, 0, 220.0, 1.0, 0.0, 0, 7, 1);
        let mut by_degree = scale.nodes.clone();
        by_degree.sort_by_key(|n| n.degree);
        for pair in by_degree.windows(2) {
            if pair[0].degree != pair[1].degree {
                assert!(pair[1].frequency_hz > pair[0].frequency_hz);
            }
        }
    }
}
