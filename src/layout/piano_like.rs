//! PianoLike layout: rows are partitioned top-to-bottom into fixed-height "strips",
//! each a self-contained piano-style keyboard where one row is the natural row and
//! the rows above/below it are accidentals.

use std::collections::HashMap;

use super::Pad;
use crate::error::LayoutError;
use crate::mos::{IVec2, Mos, Scale};

#[derive(Debug, Clone)]
pub struct PianoLike {
    pub root_x: i32,
    pub root_y: i32,
    pub strip_width: u32,
    pub scale_row_index: u32,
    pub row_offset: i32,
    pub controller_rows: u32,
    pub min_y: i32,
    /// MOS seen on the last `calculate_mapping` call, cached so `get_lattice_coord`
    /// can answer without the current scale threaded into its signature.
    cached_mos: Option<Mos>,
}

impl PianoLike {
    pub fn new(root_x: i32, root_y: i32, strip_width: u32, scale_row_index: u32, row_offset: i32, controller_rows: u32, min_y: i32) -> Self {
        PianoLike {
            root_x,
            root_y,
            strip_width: strip_width.max(1),
            scale_row_index,
            row_offset,
            controller_rows,
            min_y,
            cached_mos: None,
        }
    }

    fn accidental_sign(mos: &Mos) -> i32 {
        if mos.large_vec.x == 1 {
            1
        } else {
            -1
        }
    }

    /// Resolve a pad's lattice coordinate per the piano-strip formula in §4.3. Returns
    /// `None` if the pad falls in the unmapped remainder above the complete strips.
    fn lattice_coord(&self, pad: Pad, mos: &Mos) -> Option<IVec2> {
        let n = (mos.n_large + mos.n_small) as i32;
        if n == 0 {
            return None;
        }
        let num_complete_strips = self.controller_rows / self.strip_width;
        let y_from_bottom = pad.ly - self.min_y;
        if y_from_bottom < 0 || y_from_bottom as u32 >= num_complete_strips * self.strip_width {
            return None;
        }
        let strip = y_from_bottom as u32 / self.strip_width;
        let y_in_strip = (y_from_bottom as u32 % self.strip_width) as i32 - self.scale_row_index as i32;
        let scale_degree = (pad.lx - self.root_x) + strip as i32 * self.row_offset;
        let accidental = Self::accidental_sign(mos) * y_in_strip;

        let neutral_mode = if mos.large_vec.x == 1 { 1 } else { mos.n0 - 2 };
        let q = (neutral_mode - mos.a0 * scale_degree).div_euclid(n);
        let cx = accidental - q;
        let cy = scale_degree - cx;
        Some(IVec2::new(cx, cy))
    }

    pub fn calculate_mapping(&mut self, pads: &[Pad], scale: &Scale) -> HashMap<Pad, usize> {
        self.cached_mos = Some(scale.mos.clone());
        let mut out = HashMap::with_capacity(pads.len());
        for &pad in pads {
            if let Some(coord) = self.lattice_coord(pad, &scale.mos) {
                if let Some(index) = scale.coord_to_index(coord) {
                    out.insert(pad, index);
                }
            }
        }
        out
    }

    pub fn get_lattice_coord(&self, pad: Pad) -> Option<IVec2> {
        let mos = self.cached_mos.as_ref()?;
        self.lattice_coord(pad, mos)
    }

    pub fn apply_transformation(&mut self, kind: &str) -> Result<(), LayoutError> {
        match kind {
            "shift_left" => self.root_x -= 1,
            "shift_right" => self.root_x += 1,
            "shift_up" => self.root_y += 1,
            "shift_down" => self.root_y -= 1,
            "skew_left" => self.row_offset -= 1,
            "skew_right" => self.row_offset += 1,
            "increase_strip_width" => {
                let max = self.controller_rows.max(1);
                self.strip_width = (self.strip_width + 1).min(max);
            }
            "decrease_strip_width" => {
                self.strip_width = self.strip_width.saturating_sub(1).max(1);
            }
            "scale_row_up" => {
                if self.scale_row_index + 1 < self.strip_width {
                    self.scale_row_index += 1;
                }
            }
            "scale_row_down" => {
                self.scale_row_index = self.scale_row_index.saturating_sub(1);
            }
            other => return Err(LayoutError::UnknownTransformation(other.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mos::Mos;

    fn diatonic_mos() -> Mos {
        // 5L2s diatonic: period (5,2), a reasonably-behaved non-degenerate MOS.
        Mos::from_generator(4, 0b0101, 1)
    }

    #[test]
    fn strip_width_clamps_to_controller_rows() {
        let mut layout = PianoLike::new(0, 0, 2, 0, 7, 8, 0);
        for _ in 0..20 {
            layout.apply_transformation("increase_strip_width").unwrap();
        }
        assert!(layout.strip_width <= 8);
    }

    #[test]
    fn strip_width_never_drops_below_one() {
        let mut layout = PianoLike::new(0, 0, 2, 0, 7, 8, 0);
        for _ in 0..5 {
            layout.apply_transformation("decrease_strip_width").unwrap();
        }
        assert_eq!(layout.strip_width, 1);
    }

    #[test]
    fn scale_row_index_stays_within_strip() {
        let mut layout = PianoLike::new(0, 0, 2, 0, 7, 8, 0);
        for _ in 0..5 {
            layout.apply_transformation("scale_row_up").unwrap();
        }
        assert!(layout.scale_row_index < layout.strip_width);
    }

    #[test]
    fn rows_above_complete_strips_are_unmapped() {
        let layout = PianoLike::new(0, 0, 2, 0, 7, 3, 0);
        let mos = diatonic_mos();
        // controller_rows=3, strip_width=2 -> 1 complete strip (rows 0-1); row 2 unmapped.
        assert!(layout.lattice_coord(Pad { lx: 0, ly: 2 }, &mos).is_none());
        assert!(layout.lattice_coord(Pad { lx: 0, ly: 0 }, &mos).is_some());
    }
}
