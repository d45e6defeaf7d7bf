//! MIDI port discovery and name normalization.
//!
//! Port names carry platform-specific noise — ALSA appends a sequencer client:port id
//! and sometimes a bracketed hardware qualifier — that changes across reboots even
//! though the physical device hasn't. Matching strips that noise first so a controller
//! learned on one boot still matches after ALSA renumbers it.

/// Strip a trailing bracketed hardware qualifier (`" [hw:3,0,0]"`) and a trailing ALSA
/// sequencer client:port id (`" 28:0"`) from a port name.
///
/// ```
/// # use pitchgrid_mapper::midi::ports::normalize_port_name;
/// assert_eq!(normalize_port_name("DDJ-SB2 MIDI 1 [hw:3,0,0]"), "DDJ-SB2 MIDI 1");
/// assert_eq!(normalize_port_name("Launchkey 25:0"), "Launchkey");
/// ```
pub fn normalize_port_name(name: &str) -> String {
    let mut result = name.trim();

    if let Some(bracket_pos) = result.rfind('[') {
        result = result[..bracket_pos].trim();
    }

    if let Some(last_space) = result.rfind(' ') {
        let suffix = &result[last_space + 1..];
        if suffix.contains(':') {
            let parts: Vec<&str> = suffix.split(':').collect();
            if parts.len() == 2
                && !parts[0].is_empty()
                && !parts[1].is_empty()
                && parts[0].chars().all(|c| c.is_ascii_digit())
                && parts[1].chars().all(|c| c.is_ascii_digit())
            {
                result = result[..last_space].trim();
            }
        }
    }

    result.to_string()
}

/// Try an exact match against a previously learned port name first (both normalized),
/// then fall back to a case-insensitive substring match against the descriptor's
/// configured `MIDIDeviceName`.
pub fn port_matches(actual_port: &str, learned_port_name: Option<&str>, midi_device_name: &str) -> bool {
    let normalized_actual = normalize_port_name(actual_port);

    if let Some(learned) = learned_port_name {
        let normalized_learned = normalize_port_name(learned);
        if normalized_actual.eq_ignore_ascii_case(&normalized_learned) {
            return true;
        }
    }

    let normalized_match = normalize_port_name(midi_device_name);
    normalized_actual.to_lowercase().contains(&normalized_match.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bracketed_hardware_id() {
        assert_eq!(normalize_port_name("DDJ-SB2 MIDI 1 [hw:3,0,0]"), "DDJ-SB2 MIDI 1");
        assert_eq!(normalize_port_name("Launchpad Mini MK3 [hw:1,0,0]"), "Launchpad Mini MK3");
    }

    #[test]
    fn strips_trailing_alsa_client_port_id() {
        assert_eq!(normalize_port_name("DDJ-SB2:DDJ-SB2 MIDI 1 28:0"), "DDJ-SB2:DDJ-SB2 MIDI 1");
        assert_eq!(normalize_port_name("DDJ-SB2:DDJ-SB2 MIDI 1 20:0"), "DDJ-SB2:DDJ-SB2 MIDI 1");
    }

    #[test]
    fn leaves_plain_names_untouched() {
        assert_eq!(normalize_port_name("DDJ-SB2 MIDI 1"), "DDJ-SB2 MIDI 1");
        assert_eq!(normalize_port_name("  Padded Name  "), "Padded Name");
    }

    #[test]
    fn exact_match_against_learned_name_wins_first() {
        assert!(port_matches(
            "DDJ-SB2:DDJ-SB2 MIDI 1 28:0",
            Some("DDJ-SB2:DDJ-SB2 MIDI 1 20:0"),
            "something-else"
        ));
    }

    #[test]
    fn falls_back_to_substring_match() {
        assert!(port_matches("Launchkey 25:0 [hw:1,0,0]", None, "launchkey"));
        assert!(!port_matches("Unrelated Device", None, "launchkey"));
    }
}
