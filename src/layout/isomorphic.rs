//! Isomorphic layout: a single unimodular integer affine transform maps lattice space
//! to device space. Every pad a fixed distance apart in lattice coordinates is the same
//! musical interval apart on the surface, regardless of where on the grid it sits.

use std::collections::HashMap;

use super::{fit_unimodular_from_three_anchors, Pad};
use crate::error::LayoutError;
use crate::mos::{IVec2, Mos, Scale};

/// A unimodular integer affine map `M(v) = A·v + t`, `A` a 2x2 integer matrix with
/// `det A = ±1`, represented as the six integers the spec calls out directly.
///
/// This is a distinct transform from [`crate::mos::affine_from_three_points`]'s
/// continuous-valued lattice-to-logical fit used inside tuning reconstruction — that
/// one solves for real-valued pitch positions; this one is the discrete, invertible map
/// between a MOS's integer lattice and a controller's integer pad grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerAffine {
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub d: i32,
    pub tx: i32,
    pub ty: i32,
}

impl IntegerAffine {
    pub const IDENTITY: IntegerAffine = IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: 0, ty: 0 };

    pub fn det(&self) -> i64 {
        self.a as i64 * self.d as i64 - self.b as i64 * self.c as i64
    }

    pub fn apply(&self, v: IVec2) -> (i32, i32) {
        (self.a * v.x + self.b * v.y + self.tx, self.c * v.x + self.d * v.y + self.ty)
    }

    /// Inverse of a unimodular integer matrix is itself integer: `A⁻¹ = det·[[d,-b],[-c,a]]`
    /// with `det ∈ {1,-1}`, and the translation inverts along with it.
    pub fn invert(&self) -> Option<IntegerAffine> {
        let det = self.det();
        if det != 1 && det != -1 {
            return None;
        }
        let det = det as i32;
        let ia = det * self.d;
        let ib = det * -self.b;
        let ic = det * -self.c;
        let id = det * self.a;
        // inv(v) solves A*inv(v) + t = v  =>  inv(v) = A^-1 * (v - t)
        let itx = -(ia * self.tx + ib * self.ty);
        let ity = -(ic * self.tx + id * self.ty);
        Some(IntegerAffine { a: ia, b: ib, c: ic, d: id, tx: itx, ty: ity })
    }

    /// `A`-only part (linear component), translation zeroed.
    fn a_only(&self) -> IntegerAffine {
        IntegerAffine { tx: 0, ty: 0, ..*self }
    }

    /// `t`-only part (translation component), linear part set to identity.
    fn t_only(&self) -> IntegerAffine {
        IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: self.tx, ty: self.ty }
    }

    fn compose(outer: &IntegerAffine, inner: &IntegerAffine) -> IntegerAffine {
        // (outer ∘ inner)(v) = outer(inner(v))
        IntegerAffine {
            a: outer.a * inner.a + outer.b * inner.c,
            b: outer.a * inner.b + outer.b * inner.d,
            c: outer.c * inner.a + outer.d * inner.c,
            d: outer.c * inner.b + outer.d * inner.d,
            tx: outer.a * inner.tx + outer.b * inner.ty + outer.tx,
            ty: outer.c * inner.tx + outer.d * inner.ty + outer.ty,
        }
    }
}

/// Predefined unimodular delta matrices for rectangular controllers, applied between
/// the translation and linear parts of the current transform (§4.3, "User edits").
fn rect_delta(kind: &str) -> Option<IntegerAffine> {
    Some(match kind {
        "shift_left" => IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: -1, ty: 0 },
        "shift_right" => IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: 1, ty: 0 },
        "shift_up" => IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: 0, ty: 1 },
        "shift_down" => IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: 0, ty: -1 },
        "skew_left" => IntegerAffine { a: 1, b: -1, c: 0, d: 1, tx: 0, ty: 0 },
        "skew_right" => IntegerAffine { a: 1, b: 1, c: 0, d: 1, tx: 0, ty: 0 },
        "rotate_left" => IntegerAffine { a: 0, b: -1, c: 1, d: 0, tx: 0, ty: 0 },
        "rotate_right" => IntegerAffine { a: 0, b: 1, c: -1, d: 0, tx: 0, ty: 0 },
        "reflect_horizontal" => IntegerAffine { a: 1, b: 0, c: 0, d: -1, tx: 0, ty: 0 },
        "reflect_vertical" => IntegerAffine { a: -1, b: 0, c: 0, d: 1, tx: 0, ty: 0 },
        _ => return None,
    })
}

/// Predefined unimodular delta matrices for hex controllers.
fn hex_delta(kind: &str) -> Option<IntegerAffine> {
    Some(match kind {
        "shift_left" => IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: -1, ty: 0 },
        "shift_right" => IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: 1, ty: 0 },
        "shift_upright" => IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: 0, ty: 1 },
        "shift_downleft" => IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: 0, ty: -1 },
        "shift_upleft" => IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: -1, ty: 1 },
        "shift_downright" => IntegerAffine { a: 1, b: 0, c: 0, d: 1, tx: 1, ty: -1 },
        "skew_upright" => IntegerAffine { a: 1, b: 0, c: -1, d: 1, tx: 0, ty: 0 },
        "skew_downleft" => IntegerAffine { a: 1, b: 0, c: 1, d: 1, tx: 0, ty: 0 },
        "rotate_left" => IntegerAffine { a: 0, b: -1, c: 1, d: 1, tx: 0, ty: 0 },
        "rotate_right" => IntegerAffine { a: 1, b: 1, c: -1, d: 0, tx: 0, ty: 0 },
        "reflect_x" => IntegerAffine { a: 1, b: 1, c: 0, d: -1, tx: 0, ty: 0 },
        "reflect_y" => IntegerAffine { a: -1, b: 0, c: 1, d: 1, tx: 0, ty: 0 },
        "reflect_xy" => IntegerAffine { a: 0, b: -1, c: -1, d: 0, tx: 0, ty: 0 },
        _ => return None,
    })
}

/// Whether a controller's pad grid is hexagonal, decided at descriptor load by the
/// angle between rows and columns (see `controller::ControllerDescriptor::is_hex`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    Rect,
    Hex,
}

#[derive(Debug, Clone)]
pub struct Isomorphic {
    pub transform: IntegerAffine,
    pub geometry: Geometry,
    pub root: Pad,
}

impl Isomorphic {
    pub fn new(geometry: Geometry, root: Pad) -> Self {
        Isomorphic { transform: IntegerAffine::IDENTITY, geometry, root }
    }

    /// Initial fit on first tuning, or a retune-preserving-orientation fit: either way,
    /// three lattice anchors map to three device targets built around `root`.
    pub fn fit_from_anchors(&mut self, mos: &Mos, device_targets: [(i32, i32); 3]) {
        let lattice = [IVec2::new(0, 0), mos.period_vec, mos.generator_vec];
        match fit_unimodular_from_three_anchors(lattice, device_targets) {
            Some(fit) => self.transform = fit,
            None => {
                log::warn!("isomorphic fit was not unimodular after rounding; keeping identity+translation");
                self.transform = IntegerAffine { tx: self.root.lx, ty: self.root.ly, ..IntegerAffine::IDENTITY };
            }
        }
    }

    pub fn calculate_mapping(&self, pads: &[Pad], scale: &Scale) -> HashMap<Pad, usize> {
        let mut out = HashMap::with_capacity(pads.len());
        let Some(inverse) = self.transform.invert() else {
            return out;
        };
        for &pad in pads {
            let (cx, cy) = inverse.apply(IVec2::new(pad.lx, pad.ly));
            if let Some(index) = scale.coord_to_index(IVec2::new(cx, cy)) {
                out.insert(pad, index);
            }
        }
        out
    }

    pub fn get_lattice_coord(&self, pad: Pad) -> Option<IVec2> {
        let inverse = self.transform.invert()?;
        let (cx, cy) = inverse.apply(IVec2::new(pad.lx, pad.ly));
        Some(IVec2::new(cx, cy))
    }

    pub fn apply_transformation(&mut self, kind: &str) -> Result<(), LayoutError> {
        let delta = match self.geometry {
            Geometry::Rect => rect_delta(kind),
            Geometry::Hex => hex_delta(kind),
        }
        .ok_or_else(|| LayoutError::UnknownTransformation(kind.to_string()))?;

        let candidate = IntegerAffine::compose(
            &IntegerAffine::compose(&self.transform.t_only(), &delta),
            &self.transform.a_only(),
        );
        if candidate.det().abs() != 1 {
            return Err(LayoutError::NotUnimodular(candidate.det()));
        }
        self.transform = candidate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_inverts_to_identity() {
        assert_eq!(IntegerAffine::IDENTITY.invert().unwrap(), IntegerAffine::IDENTITY);
    }

    #[test]
    fn invert_round_trips() {
        let m = IntegerAffine { a: 0, b: -1, c: 1, d: 0, tx: 3, ty: -2 };
        let inv = m.invert().unwrap();
        let p = IVec2::new(5, 7);
        let mapped = m.apply(p);
        let back = inv.apply(IVec2::new(mapped.0, mapped.1));
        assert_eq!(back, (p.x, p.y));
    }

    #[test]
    fn shift_left_then_right_is_identity() {
        let mut layout = Isomorphic::new(Geometry::Rect, Pad { lx: 0, ly: 0 });
        layout.apply_transformation("shift_left").unwrap();
        layout.apply_transformation("shift_right").unwrap();
        assert_eq!(layout.transform, IntegerAffine::IDENTITY);
    }

    #[test]
    fn unknown_transformation_is_rejected() {
        let mut layout = Isomorphic::new(Geometry::Rect, Pad { lx: 0, ly: 0 });
        assert!(layout.apply_transformation("barrel_roll").is_err());
        assert_eq!(layout.transform, IntegerAffine::IDENTITY);
    }

    #[test]
    fn every_named_delta_stays_unimodular() {
        for kind in [
            "shift_left", "shift_right", "shift_up", "shift_down", "skew_left", "skew_right",
            "rotate_left", "rotate_right", "reflect_horizontal", "reflect_vertical",
        ] {
            let mut layout = Isomorphic::new(Geometry::Rect, Pad { lx: 0, ly: 0 });
            layout.apply_transformation(kind).unwrap();
            assert_eq!(layout.transform.det().abs(), 1, "{kind} broke unimodularity");
        }
    }
}
