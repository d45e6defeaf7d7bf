//! The coordinator: the single piece of code that knows about controller descriptors,
//! the current layout, the current tuning, and how to install a fresh mapping into the
//! MIDI core.
//!
//! Talks to the MIDI core only through [`midi::MappingProvider`]/[`midi::NoteEventSink`]
//! (implemented here) so there is no cyclic dependency between "the thing that decides
//! what a pad means" and "the thing that moves bytes" — the remap thread only ever
//! reads a [`midi::MappingSnapshot`] through the trait, never calls back into the
//! coordinator directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::AppConfig;
use crate::controller::ControllerDescriptor;
use crate::layout::{Isomorphic, Layout, Pad, PianoLike, StringLike};
use crate::midi::input::{MappingProvider, MappingSnapshot, NoteEventSink, RemapThread};
use crate::midi::output::{ControllerOutput, VirtualOutput};
use crate::midi::{connection, input, output};
use crate::mos::Scale;
use crate::osc::TuningMessage;

/// Error surface for coordinator operations that the CLI layer reports and recovers
/// from rather than panicking on — matches §7's "report and continue" policies for
/// `PortUnavailable`/`TuningBuild`/`MapInvert`.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("no controller descriptor named `{0}` is loaded")]
    UnknownController(String),
    #[error("no controller is currently active")]
    NoActiveController,
    #[error(transparent)]
    Layout(#[from] crate::error::LayoutError),
}

/// Thread-safe holder for the mapping snapshot the remap thread reads. A short-lived
/// lock around an `Arc` clone, not a lock around the data itself — contention is
/// limited to the instant a fresh snapshot is installed.
#[derive(Clone)]
pub struct SharedMapping {
    inner: Arc<Mutex<Arc<MappingSnapshot>>>,
}

impl SharedMapping {
    fn new() -> Self {
        SharedMapping { inner: Arc::new(Mutex::new(Arc::new(MappingSnapshot::default()))) }
    }

    fn set(&self, snapshot: MappingSnapshot) {
        *self.inner.lock().expect("mapping mutex poisoned") = Arc::new(snapshot);
    }
}

impl MappingProvider for SharedMapping {
    fn current_mapping(&self) -> Arc<MappingSnapshot> {
        self.inner.lock().expect("mapping mutex poisoned").clone()
    }
}

/// Forwards remapped note activity to whatever the embedding application registered —
/// a no-op by default, since the UI/WebSocket push surface is out of scope here.
pub trait ActivitySink: Send + Sync {
    fn on_note_event(&self, lx: i32, ly: i32, note_on: bool);
}

struct NullActivitySink;
impl ActivitySink for NullActivitySink {
    fn on_note_event(&self, _lx: i32, _ly: i32, _note_on: bool) {}
}

/// Forwards controller connect/disconnect transitions — the "status event" §5's
/// discovery thread and §7's `PortLost` policy both call for, pushed out through
/// whatever the embedding application (the out-of-scope HTTP/WS surface) registers.
/// A no-op by default.
pub trait StatusSink: Send + Sync {
    fn on_controller_status(&self, device_name: &str, connected: bool);
}

struct NullStatusSink;
impl StatusSink for NullStatusSink {
    fn on_controller_status(&self, _device_name: &str, _connected: bool) {}
}

struct CoordinatorSink {
    inner: Arc<dyn ActivitySink>,
}

impl NoteEventSink for CoordinatorSink {
    fn on_note_event(&self, lx: i32, ly: i32, note_on: bool) {
        self.inner.on_note_event(lx, ly, note_on);
    }
}

/// Live connection state for whichever controller is active, torn down wholesale on
/// every `switch_controller`.
struct ActiveController {
    descriptor: Arc<ControllerDescriptor>,
    layout: Layout,
    learned_input_port: Option<String>,
    controller_output: Arc<Mutex<ControllerOutput>>,
    remap_thread: Option<RemapThread>,
    _input_connection: Option<midir::MidiInputConnection<crate::midi::queue::QueueSender>>,
    color_worker: Option<(std::thread::JoinHandle<()>, flume::Sender<HashMap<(i32, i32), [u8; 3]>>)>,
}

/// Owns every controller descriptor, the active controller's connection and layout
/// state, and the current tuning. This is the one place SPEC_FULL.md's §4.4 operations
/// live.
pub struct Coordinator {
    config: AppConfig,
    descriptors: Vec<Arc<ControllerDescriptor>>,
    active: Option<ActiveController>,
    scale: Scale,
    mapping: SharedMapping,
    virtual_output: Arc<Mutex<VirtualOutput>>,
    activity_sink: Arc<dyn ActivitySink>,
    status_sink: Arc<dyn StatusSink>,
}

impl Coordinator {
    /// Load every controller descriptor from `config.controller_config_dir` and open
    /// the virtual output port. No controller is active yet; call [`switch_controller`]
    /// to pick one.
    pub fn new(config: AppConfig) -> Self {
        let descriptors = crate::controller::load_all(&config.controller_config_dir)
            .into_iter()
            .map(Arc::new)
            .collect();
        let virtual_output = connection::open_virtual_output(&config.virtual_midi_output_name);
        let scale = Scale::recalculate(1, 0, 261.625_565, 1.0, 0.0, 0, 12, 1);
        Coordinator {
            config,
            descriptors,
            active: None,
            scale,
            mapping: SharedMapping::new(),
            virtual_output: Arc::new(Mutex::new(VirtualOutput::new(virtual_output))),
            activity_sink: Arc::new(NullActivitySink),
            status_sink: Arc::new(NullStatusSink),
        }
    }

    pub fn set_activity_sink(&mut self, sink: Arc<dyn ActivitySink>) {
        self.activity_sink = sink;
    }

    pub fn set_status_sink(&mut self, sink: Arc<dyn StatusSink>) {
        self.status_sink = sink;
    }

    pub fn descriptors(&self) -> &[Arc<ControllerDescriptor>] {
        &self.descriptors
    }

    /// Whether the currently active controller (if any) has a live input connection.
    /// `false` both when no controller is active and after [`Coordinator::check_port_liveness`]
    /// has torn one down because its port disappeared.
    pub fn is_controller_connected(&self) -> bool {
        self.active.as_ref().map(|a| a._input_connection.is_some()).unwrap_or(false)
    }

    /// Discovery-thread tick (§5 "Discovery thread"): if a controller is connected but
    /// its matched input port is no longer among `available_input_ports`, tear the
    /// connection down and surface a status event — §7's `PortLost` policy. Returns
    /// `true` if a disconnect happened this call.
    pub fn check_port_liveness(&mut self, available_input_ports: &[String]) -> bool {
        let Some(active) = self.active.as_ref() else {
            return false;
        };
        if active._input_connection.is_none() {
            return false;
        }
        let still_present = available_input_ports.iter().any(|port| {
            crate::midi::ports::port_matches(port, active.learned_input_port.as_deref(), &active.descriptor.midi_device_name)
        });
        if still_present {
            return false;
        }
        let device_name = active.descriptor.device_name.clone();
        self.active = None; // dropping ActiveController tears down its threads/ports.
        log::warn!("controller `{device_name}` port disappeared; disconnected");
        self.status_sink.on_controller_status(&device_name, false);
        true
    }

    /// Tear down the current controller connection (if any), select a new descriptor by
    /// `DeviceName`, build its default layout, and connect.
    pub fn switch_controller(&mut self, device_name: &str) -> Result<(), CoordinatorError> {
        let descriptor = self
            .descriptors
            .iter()
            .find(|d| d.device_name == device_name)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownController(device_name.to_string()))?;

        self.active = None; // dropping the old ActiveController tears down its threads/ports.

        let root = descriptor
            .default_iso_root_coordinate
            .map(|(lx, ly)| Pad { lx, ly })
            .unwrap_or(Pad { lx: 0, ly: 0 });
        let layout = Layout::Isomorphic(Isomorphic::new(descriptor.geometry, root));

        self.active = Some(ActiveController {
            descriptor,
            layout,
            learned_input_port: None,
            controller_output: Arc::new(Mutex::new(ControllerOutput::new(None))),
            remap_thread: None,
            _input_connection: None,
            color_worker: None,
        });

        self.connect()?;
        self.recompute();
        Ok(())
    }

    /// Open (or reopen) the input, controller-output, and remap-thread connections for
    /// the currently active controller. Safe to call again after a `PortLost` event.
    pub fn connect(&mut self) -> Result<(), CoordinatorError> {
        let active = self.active.as_mut().ok_or(CoordinatorError::NoActiveController)?;
        let midi_device_name = active.descriptor.midi_device_name.clone();
        let learned = active.learned_input_port.clone();

        match input::connect_controller_input(&midi_device_name, learned.as_deref()) {
            Ok((connection, port_name, queue)) => {
                active.learned_input_port = Some(port_name);
                active._input_connection = Some(connection);

                let mapping = self.mapping.clone();
                let sink: Arc<dyn NoteEventSink> = Arc::new(CoordinatorSink { inner: self.activity_sink.clone() });
                let virtual_output = self.virtual_output.clone();
                let remap = RemapThread::spawn(queue, Arc::new(mapping), sink, move |bytes: &[u8]| {
                    virtual_output.lock().expect("virtual output mutex poisoned").send(bytes);
                });
                active.remap_thread = Some(remap);
                self.status_sink.on_controller_status(&midi_device_name, true);
            }
            Err(e) => {
                log::error!("failed to connect controller input for `{midi_device_name}`: {e}");
            }
        }

        let controller_output_conn = connection::connect_output(&midi_device_name, learned.as_deref());
        *active.controller_output.lock().expect("controller output mutex poisoned") =
            ControllerOutput::new(controller_output_conn);

        let (handle, sender) = output::spawn_color_worker(active.controller_output.clone(), active.descriptor.clone());
        active.color_worker = Some((handle, sender));

        Ok(())
    }

    /// Switch the active controller's layout policy (`"isomorphic"`, `"string_like"`,
    /// `"piano_like"`), preserving nothing from the previous calculator — a fresh
    /// calculator starting from the controller's default root.
    pub fn update_layout(&mut self, kind: &str) -> Result<(), CoordinatorError> {
        let active = self.active.as_mut().ok_or(CoordinatorError::NoActiveController)?;
        let root = active.descriptor.default_iso_root_coordinate.map(|(lx, ly)| Pad { lx, ly }).unwrap_or(Pad { lx: 0, ly: 0 });

        active.layout = match kind {
            "isomorphic" => Layout::Isomorphic(Isomorphic::new(active.descriptor.geometry, root)),
            "string_like" => Layout::StringLike(StringLike::new(root.lx, root.ly, active.descriptor.num_rows.max(1) as i32)),
            "piano_like" => Layout::PianoLike(PianoLike::new(
                root.lx,
                root.ly,
                2,
                0,
                7,
                active.descriptor.num_rows,
                active.descriptor.pads.iter().map(|p| p.ly).min().unwrap_or(0),
            )),
            other => return Err(CoordinatorError::Layout(crate::error::LayoutError::UnknownTransformation(other.to_string()))),
        };

        if let Layout::Isomorphic(iso) = &mut active.layout {
            let device_targets = [(root.lx, root.ly), (root.lx + 1, root.ly), (root.lx, root.ly + 1)];
            iso.fit_from_anchors(&self.scale.mos, device_targets);
        }

        self.recompute();
        Ok(())
    }

    /// Apply a named edit (e.g. `"shift_left"`, `"skew_right"`) to the active layout.
    pub fn apply_transformation(&mut self, kind: &str) -> Result<(), CoordinatorError> {
        let active = self.active.as_mut().ok_or(CoordinatorError::NoActiveController)?;
        active.layout.apply_transformation(kind)?;
        self.recompute();
        Ok(())
    }

    /// Rebuild the tuning scale from a fresh `/pitchgrid/tuning` message and recompute
    /// the installed mapping. Construction never fails outright (`Scale::recalculate`
    /// clamps degenerate inputs), matching §7's `TuningBuild` policy of "use the
    /// nearest valid tuning rather than rejecting the update".
    pub fn on_tuning(&mut self, tuning: TuningMessage) {
        self.scale = Scale::recalculate(
            tuning.depth,
            tuning.mode,
            tuning.root_freq,
            tuning.stretch,
            tuning.skew,
            tuning.mode_offset,
            tuning.steps,
            1,
        );

        if let Some(active) = self.active.as_mut() {
            if let Layout::Isomorphic(iso) = &mut active.layout {
                let root = iso.root;
                let device_targets = [(root.lx, root.ly), (root.lx + 1, root.ly), (root.lx, root.ly + 1)];
                iso.fit_from_anchors(&self.scale.mos, device_targets);
            }
        }

        self.recompute();
    }

    /// Synthesize a note event for `(lx, ly)` as if the controller itself had sent it —
    /// used by a UI "virtual pad" surface. Looked up through the same layout the remap
    /// thread uses, so it's never out of step with a real pad press.
    pub fn trigger_note(&mut self, lx: i32, ly: i32, velocity: u8, note_on: bool) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let Some(coord) = active.layout.get_lattice_coord(Pad { lx, ly }) else {
            return;
        };
        let Some(index) = self.scale.coord_to_index(coord) else {
            return;
        };
        let status = if note_on { 0x90 } else { 0x80 };
        self.virtual_output.lock().expect("virtual output mutex poisoned").send(&[status, index as u8, velocity]);
        self.activity_sink.on_note_event(lx, ly, note_on);
    }

    /// Recompute `pad -> scale index` for every pad the active controller declares,
    /// install the fresh mapping snapshot for the remap thread, and push a setup/color
    /// refresh out to the controller. Every layout-affecting operation ends here.
    pub fn recompute(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let pads: Vec<Pad> = active.descriptor.pads.iter().map(|p| Pad { lx: p.lx, ly: p.ly }).collect();
        let pad_to_index = active.layout.calculate_mapping(&pads, &self.scale);

        let snapshot = MappingSnapshot {
            reverse_mapping: active.descriptor.reverse_mapping.clone(),
            pad_to_index: pad_to_index.iter().map(|(p, &idx)| ((p.lx, p.ly), idx)).collect(),
        };
        self.mapping.set(snapshot);

        let pad_to_index_coords: HashMap<(i32, i32), usize> = pad_to_index.iter().map(|(p, &idx)| ((p.lx, p.ly), idx)).collect();
        {
            let mut output = active.controller_output.lock().expect("controller output mutex poisoned");
            output::send_pad_notes_bulk(&mut output, &active.descriptor, &pad_to_index_coords);
            output::send_pad_note_setup(&mut output, &active.descriptor, &pad_to_index_coords, 0);
        }

        // pad -> color table, the second of the two dictionaries this recompute builds
        // (§3's "pad -> color/label"), handed to the dedicated color-send worker so a
        // bulk refresh never blocks this call. The worker picks up its own fresh
        // generation via `cancel_in_flight` inside `send_pad_colors`.
        if let Some((_, sender)) = active.color_worker.as_ref() {
            let colors = pad_colors(&active.descriptor.pads, &pad_to_index_coords);
            if sender.send(colors).is_err() {
                log::warn!("color-send worker channel closed; skipping color refresh");
            }
        }
    }
}

/// Derive a display color per declared pad from its scale index, the same fallback the
/// original engine used when no device-specific coloring scheme was configured: a hue
/// that steps by 30° per scale degree, rendered at a fixed saturation/lightness.
/// Unmapped pads get a dark, unsaturated gray so they visually read as "off" on the
/// surface rather than an arbitrary color.
fn pad_colors(
    pads: &[crate::controller::PadGeometry],
    pad_to_index: &HashMap<(i32, i32), usize>,
) -> HashMap<(i32, i32), [u8; 3]> {
    const UNMAPPED: [u8; 3] = [51, 51, 51]; // hsl(0, 0%, 20%)
    pads.iter()
        .map(|pad| {
            let color = match pad_to_index.get(&(pad.lx, pad.ly)) {
                Some(&index) => {
                    let hue = ((index as f64 * 30.0) % 360.0) / 360.0;
                    hsl_to_rgb(hue, 0.70, 0.60)
                }
                None => UNMAPPED,
            };
            ((pad.lx, pad.ly), color)
        })
        .collect()
}

/// Standard HSL -> RGB conversion (`h`, `s`, `l` each in `[0, 1]`), matching the
/// original engine's `colorsys.hls_to_rgb` fallback path.
fn hsl_to_rgb(h: f64, s: f64, l: f64) -> [u8; 3] {
    if s == 0.0 {
        let v = (l * 255.0).round() as u8;
        return [v, v, v];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let to_channel = |t: f64| -> f64 {
        let mut t = t;
        if t < 0.0 {
            t += 1.0;
        }
        if t > 1.0 {
            t -= 1.0;
        }
        if t < 1.0 / 6.0 {
            p + (q - p) * 6.0 * t
        } else if t < 1.0 / 2.0 {
            q
        } else if t < 2.0 / 3.0 {
            p + (q - p) * (2.0 / 3.0 - t) * 6.0
        } else {
            p
        }
    };
    let r = to_channel(h + 1.0 / 3.0);
    let g = to_channel(h);
    let b = to_channel(h - 1.0 / 3.0);
    [(r * 255.0).round() as u8, (g * 255.0).round() as u8, (b * 255.0).round() as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_mapping_round_trips() {
        let shared = SharedMapping::new();
        let mut reverse_mapping = HashMap::new();
        reverse_mapping.insert(60u8, (0, 0));
        shared.set(MappingSnapshot { reverse_mapping, pad_to_index: HashMap::new() });
        let snapshot = shared.current_mapping();
        assert_eq!(snapshot.reverse_mapping.get(&60), Some(&(0, 0)));
    }

    #[test]
    fn coordinator_without_active_controller_reports_the_right_error() {
        let mut coordinator = Coordinator::new(AppConfig { controller_config_dir: "/nonexistent".into(), ..AppConfig::default() });
        let err = coordinator.apply_transformation("shift_left").unwrap_err();
        assert!(matches!(err, CoordinatorError::NoActiveController));
    }

    #[test]
    fn no_active_controller_reports_disconnected_and_never_panics_liveness_check() {
        let mut coordinator = Coordinator::new(AppConfig { controller_config_dir: "/nonexistent".into(), ..AppConfig::default() });
        assert!(!coordinator.is_controller_connected());
        assert!(!coordinator.check_port_liveness(&["Some Port".to_string()]));
    }

    #[test]
    fn switch_controller_reports_unknown_name() {
        let mut coordinator = Coordinator::new(AppConfig { controller_config_dir: "/nonexistent".into(), ..AppConfig::default() });
        let err = coordinator.switch_controller("Nope").unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownController(_)));
    }

    #[test]
    fn unmapped_pad_gets_the_dark_gray_fallback() {
        let pads = vec![crate::controller::PadGeometry { lx: 0, ly: 0, phys_x: 0.0, phys_y: 0.0 }];
        let colors = pad_colors(&pads, &HashMap::new());
        assert_eq!(colors.get(&(0, 0)), Some(&[51, 51, 51]));
    }

    #[test]
    fn mapped_pad_gets_a_saturated_color() {
        let pads = vec![crate::controller::PadGeometry { lx: 0, ly: 0, phys_x: 0.0, phys_y: 0.0 }];
        let mut pad_to_index = HashMap::new();
        pad_to_index.insert((0, 0), 60usize);
        let colors = pad_colors(&pads, &pad_to_index);
        assert_ne!(colors.get(&(0, 0)), Some(&[51, 51, 51]));
    }

    #[test]
    fn hsl_to_rgb_matches_known_primary_colors() {
        assert_eq!(hsl_to_rgb(0.0, 1.0, 0.5), [255, 0, 0]);
        assert_eq!(hsl_to_rgb(1.0 / 3.0, 1.0, 0.5), [0, 255, 0]);
        assert_eq!(hsl_to_rgb(2.0 / 3.0, 1.0, 0.5), [0, 0, 255]);
    }
}
