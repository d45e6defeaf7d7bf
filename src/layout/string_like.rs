//! StringLike layout: each row of the grid is a "string" tuned a fixed scale-index
//! offset from the one below it, like a guitar or dulcimer fretboard.

use std::collections::HashMap;

use super::Pad;
use crate::error::LayoutError;
use crate::mos::{IVec2, Scale};

#[derive(Debug, Clone, Default)]
pub struct StringLike {
    pub root_x: i32,
    pub root_y: i32,
    pub row_offset: i32,
    pub flip_h: bool,
    pub flip_v: bool,
    /// Reverse index built on the last `calculate_mapping` call, cached so
    /// `get_lattice_coord` can answer the same question `pad_to_index` would without
    /// needing the current scale threaded into its signature.
    index_to_coord: HashMap<i32, IVec2>,
}

impl StringLike {
    pub fn new(root_x: i32, root_y: i32, row_offset: i32) -> Self {
        StringLike { root_x, root_y, row_offset, flip_h: false, flip_v: false, index_to_coord: HashMap::new() }
    }

    fn scale_index(&self, pad: Pad) -> i32 {
        let dx = pad.lx - self.root_x;
        let dy = pad.ly - self.root_y;
        let dx = if self.flip_h { -dx } else { dx };
        let dy = if self.flip_v { -dy } else { dy };
        dy * self.row_offset + dx + 60
    }

    pub fn calculate_mapping(&mut self, pads: &[Pad], scale: &Scale) -> HashMap<Pad, usize> {
        // Build a reverse index -> coord table once so each pad is a single lookup,
        // matching the spec's "single reverse-lookup in an index→coord table".
        self.index_to_coord.clear();
        self.index_to_coord.reserve(scale.coord_to_scale_index.len());
        for (&(cx, cy), &idx) in &scale.coord_to_scale_index {
            self.index_to_coord.insert(idx as i32, IVec2::new(cx, cy));
        }

        let mut out = HashMap::with_capacity(pads.len());
        for &pad in pads {
            let index = self.scale_index(pad);
            if (0..=127).contains(&index) && self.index_to_coord.contains_key(&index) {
                out.insert(pad, index as usize);
            }
        }
        out
    }

    pub fn get_lattice_coord(&self, pad: Pad) -> Option<IVec2> {
        let index = self.scale_index(pad);
        self.index_to_coord.get(&index).copied()
    }

    pub fn apply_transformation(&mut self, kind: &str) -> Result<(), LayoutError> {
        match kind {
            "shift_left" => self.root_x -= 1,
            "shift_right" => self.root_x += 1,
            "shift_up" => self.root_y += 1,
            "shift_down" => self.root_y -= 1,
            "skew_left" => self.row_offset -= 1,
            "skew_right" => self.row_offset += 1,
            "reflect_horizontal" => self.flip_h = !self.flip_h,
            "reflect_vertical" => self.flip_v = !self.flip_v,
            other => return Err(LayoutError::UnknownTransformation(other.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guitar_string_pad_yields_spec_example_index() {
        let layout = StringLike::new(0, 0, 5);
        let pad = Pad { lx: 3, ly: 2 };
        assert_eq!(layout.scale_index(pad), 73);
    }

    #[test]
    fn flips_negate_their_axis() {
        let mut layout = StringLike::new(0, 0, 5);
        layout.apply_transformation("reflect_horizontal").unwrap();
        let pad = Pad { lx: 3, ly: 0 };
        assert_eq!(layout.scale_index(pad), 57);
    }

    #[test]
    fn skew_changes_row_offset() {
        let mut layout = StringLike::new(0, 0, 5);
        layout.apply_transformation("skew_right").unwrap();
        assert_eq!(layout.row_offset, 6);
    }
}
