//! `/pitchgrid/tuning` message schema.
//!
//! Transport is out of scope here (no OSC socket is opened by this crate) — this module
//! only defines the argument shape a UI or control surface sends, and a pure conversion
//! into the arguments [`crate::mos::Scale::recalculate`] expects. `/pitchgrid/notes` and
//! `/pitchgrid/playing` are reserved names in the same namespace but are not decoded
//! here; see DESIGN.md for why.

/// The seven-argument `/pitchgrid/tuning` payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningMessage {
    pub depth: u32,
    pub mode: i32,
    pub root_freq: f64,
    pub stretch: f64,
    pub skew: f64,
    pub mode_offset: i32,
    pub steps: i64,
}

impl TuningMessage {
    /// Build from the raw OSC argument order, clamping `depth` and `steps` to their
    /// minimum valid values rather than rejecting the message outright — a malformed
    /// tuning feed should degrade to "something plays", not silence (§7 `TuningBuild`).
    pub fn from_args(depth: i64, mode: i64, root_freq: f64, stretch: f64, skew: f64, mode_offset: i64, steps: i64) -> Self {
        TuningMessage {
            depth: depth.max(1) as u32,
            mode: mode as i32,
            root_freq,
            stretch,
            skew,
            mode_offset: mode_offset as i32,
            steps: steps.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_depth_clamps_to_one() {
        let msg = TuningMessage::from_args(-3, 0, 261.63, 1.0, 0.0, 0, 12);
        assert_eq!(msg.depth, 1);
    }

    #[test]
    fn zero_steps_clamps_to_one() {
        let msg = TuningMessage::from_args(3, 0b101, 261.63, 1.0, 0.0, 0, 0);
        assert_eq!(msg.steps, 1);
    }
}
