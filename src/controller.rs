//! Controller descriptors: the YAML-defined shape of a physical grid controller.
//!
//! A descriptor is immutable once loaded: its pad geometry, MIDI port-name matchers,
//! and wire templates don't change for the lifetime of the process. Loading is
//! tolerant per-file — a malformed descriptor is skipped with a logged error so the
//! rest of the configured directory still loads, matching the original loader's
//! per-file `try/except`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::layout::Geometry;
use crate::template::{Env, Template};

/// Raw shape of a controller descriptor YAML file, matching the field names §6 lists.
#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(rename = "DeviceName")]
    device_name: String,
    #[serde(rename = "MIDIDeviceName")]
    midi_device_name: String,
    #[serde(rename = "virtualMIDIDeviceName")]
    virtual_midi_device_name: Option<String>,
    #[serde(rename = "isMPE")]
    is_mpe: bool,
    #[serde(rename = "hasGlobalPitchBend")]
    has_global_pitch_bend: bool,

    #[serde(rename = "NumRows")]
    num_rows: u32,
    #[serde(rename = "FirstRowIdx")]
    first_row_idx: i32,
    #[serde(rename = "RowLengths")]
    row_lengths: Vec<u32>,
    #[serde(rename = "RowOffsets")]
    row_offsets: Vec<i32>,

    #[serde(rename = "HorizonToRowAngle")]
    horizon_to_row_angle: f64,
    #[serde(rename = "RowToColAngle")]
    row_to_col_angle: f64,
    #[serde(rename = "xSpacing")]
    x_spacing: f64,
    #[serde(rename = "ySpacing")]
    y_spacing: f64,

    #[serde(rename = "defaultIsoRootCoordinate")]
    default_iso_root_coordinate: Option<(i32, i32)>,

    #[serde(rename = "SetPadNoteAndChannel")]
    set_pad_note_and_channel: Option<String>,
    #[serde(rename = "SetPadColor")]
    set_pad_color: Option<String>,
    #[serde(rename = "SetPadNotesBulk")]
    set_pad_notes_bulk: Option<String>,
    #[serde(rename = "SetPadColorsBulk")]
    set_pad_colors_bulk: Option<String>,

    #[serde(rename = "noteToCoordX")]
    note_to_coord_x: Option<String>,
    #[serde(rename = "noteToCoordY")]
    note_to_coord_y: Option<String>,

    #[serde(rename = "ledPalette")]
    led_palette: Option<Vec<[u8; 3]>>,

    /// Arbitrary named macros usable inside templates (e.g. `MANUFACTURER_CODE`, `NRPN`).
    #[serde(flatten)]
    macros: HashMap<String, serde_yaml::Value>,
}

/// A single pad's logical and physical coordinates, per `_generate_pad_coordinates`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PadGeometry {
    pub lx: i32,
    pub ly: i32,
    pub phys_x: f64,
    pub phys_y: f64,
}

/// A fully loaded, immutable controller descriptor.
#[derive(Debug)]
pub struct ControllerDescriptor {
    pub device_name: String,
    pub midi_device_name: String,
    pub virtual_midi_device_name: String,
    pub is_mpe: bool,
    pub has_global_pitch_bend: bool,
    pub num_rows: u32,
    /// Declared length of each row, in descriptor row order. Fed into `Env` at template
    /// evaluation so the `cumulativeIndex` built-in can compute a flat pad index.
    pub row_lengths: Vec<u32>,
    pub pads: Vec<PadGeometry>,
    pub geometry: Geometry,
    pub default_iso_root_coordinate: Option<(i32, i32)>,
    pub set_pad_note_and_channel: Option<Template>,
    pub set_pad_color: Option<Template>,
    pub set_pad_notes_bulk: Option<Template>,
    pub set_pad_colors_bulk: Option<Template>,
    pub led_palette: Option<Vec<[u8; 3]>>,
    /// `native_note -> (lx, ly)`, built only when both `noteToCoordX`/`noteToCoordY` are
    /// present (see DESIGN.md's Open Question decision).
    pub reverse_mapping: HashMap<u8, (i32, i32)>,
    /// Config-level macros (e.g. `MANUFACTURER_CODE: "0x7D"`), resolvable inside templates.
    pub macros: HashMap<String, String>,
}

impl ControllerDescriptor {
    pub fn load(path: &Path) -> Result<ControllerDescriptor, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawDescriptor = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        ControllerDescriptor::from_raw(raw)
    }

    fn from_raw(raw: RawDescriptor) -> Result<ControllerDescriptor, ConfigError> {
        if raw.row_lengths.len() != raw.num_rows as usize {
            return Err(ConfigError::RowLengthMismatch {
                num_rows: raw.num_rows as usize,
                row_lengths: raw.row_lengths.len(),
            });
        }

        let pads = generate_pad_coordinates(&raw)?;

        let geometry = if (raw.row_to_col_angle > 75.0) && (raw.row_to_col_angle < 105.0) {
            Geometry::Rect
        } else {
            Geometry::Hex
        };

        let parse_template = |label: &str, source: &Option<String>| -> Option<Template> {
            source.as_ref().and_then(|s| match Template::parse(s) {
                Ok(t) => Some(t),
                Err(err) => {
                    log::error!("descriptor `{}`: template `{label}` rejected: {err}", raw.device_name);
                    None
                }
            })
        };

        let set_pad_note_and_channel = parse_template("SetPadNoteAndChannel", &raw.set_pad_note_and_channel);
        let set_pad_color = parse_template("SetPadColor", &raw.set_pad_color);
        let set_pad_notes_bulk = parse_template("SetPadNotesBulk", &raw.set_pad_notes_bulk);
        let set_pad_colors_bulk = parse_template("SetPadColorsBulk", &raw.set_pad_colors_bulk);

        let macros: HashMap<String, String> = raw
            .macros
            .iter()
            .filter_map(|(k, v)| value_to_macro_string(v).map(|s| (k.clone(), s)))
            .collect();

        let reverse_mapping = build_reverse_mapping(&raw, &raw.device_name, &macros);

        let virtual_midi_device_name = raw
            .virtual_midi_device_name
            .clone()
            .unwrap_or_else(|| format!("PG {}", raw.device_name));

        Ok(ControllerDescriptor {
            device_name: raw.device_name,
            midi_device_name: raw.midi_device_name,
            virtual_midi_device_name,
            is_mpe: raw.is_mpe,
            has_global_pitch_bend: raw.has_global_pitch_bend,
            num_rows: raw.num_rows,
            row_lengths: raw.row_lengths.clone(),
            pads,
            geometry,
            default_iso_root_coordinate: raw.default_iso_root_coordinate,
            set_pad_note_and_channel,
            set_pad_color,
            set_pad_notes_bulk,
            set_pad_colors_bulk,
            led_palette: raw.led_palette,
            reverse_mapping,
            macros,
        })
    }
}

fn value_to_macro_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Port the original `_generate_pad_coordinates`: cumulative row offsets walked from
/// `FirstRowIdx` up to each row, physical coordinates from the two spacing angles.
fn generate_pad_coordinates(raw: &RawDescriptor) -> Result<Vec<PadGeometry>, ConfigError> {
    let mut cumulative_row_offset = 0i32;
    if raw.first_row_idx < 0 {
        let prelude_len = (-raw.first_row_idx) as usize;
        let take = prelude_len.min(raw.row_offsets.len());
        cumulative_row_offset -= raw.row_offsets[..take].iter().sum::<i32>();
    }

    let x_angle = raw.horizon_to_row_angle.to_radians();
    let y_angle = (raw.row_to_col_angle + raw.horizon_to_row_angle).to_radians();

    let mut pads = Vec::new();
    for row_idx in 0..raw.num_rows as usize {
        let row = raw.first_row_idx + row_idx as i32;
        let row_length = raw.row_lengths[row_idx];

        if row_idx > 0 {
            let offset_idx = row_idx - 1;
            let row_offset = raw.row_offsets.get(offset_idx).copied().unwrap_or(0);
            cumulative_row_offset += row_offset;
        }

        for col_idx in 0..row_length as i32 {
            let lx = cumulative_row_offset + col_idx;
            let ly = row;
            let phys_x = lx as f64 * raw.x_spacing * x_angle.cos() + ly as f64 * raw.y_spacing * y_angle.cos();
            let phys_y = lx as f64 * raw.x_spacing * x_angle.sin() + ly as f64 * raw.y_spacing * y_angle.sin();
            pads.push(PadGeometry { lx, ly, phys_x, phys_y: -phys_y });
        }
    }
    Ok(pads)
}

/// Build `native_note -> (lx, ly)` by evaluating `noteToCoordX`/`noteToCoordY` for every
/// MIDI note 0..128, skipping any note whose expression fails to evaluate.
fn build_reverse_mapping(
    raw: &RawDescriptor,
    device_name: &str,
    macros: &HashMap<String, String>,
) -> HashMap<u8, (i32, i32)> {
    let (Some(x_src), Some(y_src)) = (&raw.note_to_coord_x, &raw.note_to_coord_y) else {
        return HashMap::new();
    };
    let (x_tpl, y_tpl) = match (Template::parse(x_src), Template::parse(y_src)) {
        (Ok(x), Ok(y)) => (x, y),
        _ => {
            log::error!("descriptor `{device_name}`: noteToCoordX/Y failed to parse, no reverse mapping built");
            return HashMap::new();
        }
    };

    let row_lengths: Vec<i64> = raw.row_lengths.iter().map(|&n| n as i64).collect();
    let mut mapping = HashMap::new();
    for note in 0u8..128 {
        let mut env = Env::new();
        env.set("noteNumber", note as i64);
        env.set_macros(macros.clone());
        env.set_row_lengths(row_lengths.clone());
        let x = x_tpl.evaluate_scalar(&env).ok();
        let y = y_tpl.evaluate_scalar(&env).ok();
        if let (Some(x), Some(y)) = (x, y) {
            mapping.insert(note, (x as i32, y as i32));
        }
    }
    mapping
}

/// Load every `*.yaml` descriptor from a directory, skipping (and logging) any file
/// that fails to parse so the rest of the directory still loads.
pub fn load_all(dir: &Path) -> Vec<ControllerDescriptor> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        log::warn!("controller config directory not found: {}", dir.display());
        return Vec::new();
    };

    let mut descriptors = Vec::new();
    for entry in entries.flatten() {
        let path: PathBuf = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        match ControllerDescriptor::load(&path) {
            Ok(descriptor) => {
                log::info!("loaded controller descriptor: {} ({} pads)", descriptor.device_name, descriptor.pads.len());
                descriptors.push(descriptor);
            }
            Err(err) => log::error!("failed to load {}: {err}", path.display()),
        }
    }
    descriptors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
DeviceName: "Test Grid"
MIDIDeviceName: "Test Controller"
isMPE: false
hasGlobalPitchBend: true
NumRows: 2
FirstRowIdx: 0
RowLengths: [4, 4]
RowOffsets: [0]
HorizonToRowAngle: 0.0
RowToColAngle: 90.0
xSpacing: 1.0
ySpacing: 1.0
noteToCoordX: "noteNumber & 0x7"
noteToCoordY: "noteNumber / 8"
"#
    }

    #[test]
    fn loads_basic_fields_and_geometry() {
        let raw: RawDescriptor = serde_yaml::from_str(sample_yaml()).unwrap();
        let descriptor = ControllerDescriptor::from_raw(raw).unwrap();
        assert_eq!(descriptor.device_name, "Test Grid");
        assert_eq!(descriptor.geometry, Geometry::Rect);
        assert_eq!(descriptor.pads.len(), 8);
    }

    #[test]
    fn row_length_mismatch_is_rejected() {
        let mut raw: RawDescriptor = serde_yaml::from_str(sample_yaml()).unwrap();
        raw.row_lengths.push(4);
        let err = ControllerDescriptor::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::RowLengthMismatch { .. }));
    }

    #[test]
    fn hex_geometry_detected_outside_perpendicular_range() {
        let mut raw: RawDescriptor = serde_yaml::from_str(sample_yaml()).unwrap();
        raw.row_to_col_angle = 60.0;
        let descriptor = ControllerDescriptor::from_raw(raw).unwrap();
        assert_eq!(descriptor.geometry, Geometry::Hex);
    }

    #[test]
    fn reverse_mapping_built_when_both_expressions_present() {
        let raw: RawDescriptor = serde_yaml::from_str(sample_yaml()).unwrap();
        let descriptor = ControllerDescriptor::from_raw(raw).unwrap();
        assert_eq!(descriptor.reverse_mapping.get(&9), Some(&(1, 1)));
    }

    #[test]
    fn reverse_mapping_absent_without_both_expressions() {
        let mut raw: RawDescriptor = serde_yaml::from_str(sample_yaml()).unwrap();
        raw.note_to_coord_y = None;
        let descriptor = ControllerDescriptor::from_raw(raw).unwrap();
        assert!(descriptor.reverse_mapping.is_empty());
    }
}
