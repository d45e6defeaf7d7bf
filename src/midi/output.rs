//! Controller wire egress: evaluating `SetPad*` templates and pacing them out to the
//! controller's own MIDI output, plus the thin virtual-output writer the remap thread
//! and trigger_note share.
//!
//! Color sends run on their own worker thread so a bulk refresh (potentially one
//! message per pad) never blocks the coordinator or stalls note remapping; a
//! [`super::egress::Generation`] lets a fresh send cut a stale one short.

use std::sync::Arc;

use midir::MidiOutputConnection;

use crate::controller::ControllerDescriptor;
use crate::template::{Env, PadContext};

use super::egress::{send_generational, Generation, DEFAULT_INTER_MESSAGE_DELAY};

/// Sole owner of the virtual output port; every write to the downstream synth funnels
/// through here so the remap thread and the coordinator's `trigger_note` never race on
/// the same connection.
pub struct VirtualOutput {
    connection: Option<MidiOutputConnection>,
}

impl VirtualOutput {
    pub fn new(connection: Option<MidiOutputConnection>) -> Self {
        VirtualOutput { connection }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Send raw bytes, silently a no-op if the port never opened (§7 `PortUnavailable`).
    pub fn send(&mut self, bytes: &[u8]) {
        if let Some(conn) = self.connection.as_mut() {
            if let Err(e) = conn.send(bytes) {
                log::warn!("virtual MIDI output send failed: {e}");
            }
        }
    }
}

/// Sole owner of the controller's own output port, used for setup and color sends.
pub struct ControllerOutput {
    connection: Option<MidiOutputConnection>,
    generation: Generation,
}

impl ControllerOutput {
    pub fn new(connection: Option<MidiOutputConnection>) -> Self {
        ControllerOutput { connection, generation: Generation::new() }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Cancel any send currently in flight. Called before a fresh color/setup send so
    /// an earlier, now-stale one is cut off rather than interleaved with the new one.
    pub fn cancel_in_flight(&self) -> u64 {
        self.generation.cancel()
    }

    pub fn generation(&self) -> Generation {
        self.generation.clone()
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        if let Some(conn) = self.connection.as_mut() {
            if let Err(e) = conn.send(bytes) {
                log::warn!("controller output send failed: {e}");
            }
        }
    }
}

/// Evaluate `SetPadNoteAndChannel` for every pad and send it, one message per pad, via
/// the controller's output port. This is the per-controller-switch / per-layout-change
/// setup send described in §4.6.
pub fn send_pad_note_setup(
    output: &mut ControllerOutput,
    descriptor: &ControllerDescriptor,
    pad_to_index: &std::collections::HashMap<(i32, i32), usize>,
    channel: u8,
) {
    let Some(template) = descriptor.set_pad_note_and_channel.as_ref() else {
        return;
    };
    let expected = output.cancel_in_flight();
    let generation = output.generation();
    for pad in &descriptor.pads {
        let Some(&index) = pad_to_index.get(&(pad.lx, pad.ly)) else {
            continue;
        };
        let mut env = Env::new();
        env.set("x", pad.lx as i64)
            .set("y", pad.ly as i64)
            .set("noteNumber", index as i64)
            .set("channel", channel as i64)
            .set_macros(descriptor.macros.clone())
            .set_row_lengths(descriptor.row_lengths.iter().map(|&n| n as i64).collect());
        let bytes = match template.evaluate(&env, &[]) {
            Ok(b) => b,
            Err(e) => {
                log::error!("SetPadNoteAndChannel evaluation failed for pad ({},{}): {e}", pad.lx, pad.ly);
                continue;
            }
        };
        if !send_generational(&bytes, &generation, expected, DEFAULT_INTER_MESSAGE_DELAY, |msg| {
            output.send_raw(msg)
        }) {
            log::debug!("pad note setup send cancelled by a newer generation");
            return;
        }
    }
}

/// Evaluate `SetPadNotesBulk` once, if present, as a cheaper alternative to the
/// per-pad setup send above.
pub fn send_pad_notes_bulk(
    output: &mut ControllerOutput,
    descriptor: &ControllerDescriptor,
    pad_to_index: &std::collections::HashMap<(i32, i32), usize>,
) {
    let Some(template) = descriptor.set_pad_notes_bulk.as_ref() else {
        return;
    };
    let pads: Vec<PadContext> = descriptor
        .pads
        .iter()
        .filter_map(|p| {
            pad_to_index.get(&(p.lx, p.ly)).map(|&idx| PadContext {
                x: p.lx as i64,
                y: p.ly as i64,
                note_number: idx as i64,
                red: 0,
                green: 0,
                blue: 0,
            })
        })
        .collect();
    let expected = output.cancel_in_flight();
    let generation = output.generation();
    let mut env = Env::new();
    env.set_macros(descriptor.macros.clone())
        .set_row_lengths(descriptor.row_lengths.iter().map(|&n| n as i64).collect());
    let bytes = match template.evaluate(&env, &pads) {
        Ok(b) => b,
        Err(e) => {
            log::error!("SetPadNotesBulk evaluation failed: {e}");
            return;
        }
    };
    send_generational(&bytes, &generation, expected, DEFAULT_INTER_MESSAGE_DELAY, |msg| output.send_raw(msg));
}

/// Evaluate `SetPadColor` (or `SetPadColorsBulk` if present) for a full-board color
/// refresh, run from the dedicated color-send worker thread.
pub fn send_pad_colors(
    output: &mut ControllerOutput,
    descriptor: &ControllerDescriptor,
    colors: &std::collections::HashMap<(i32, i32), [u8; 3]>,
) {
    let expected = output.cancel_in_flight();
    let generation = output.generation();

    if let Some(template) = descriptor.set_pad_colors_bulk.as_ref() {
        let pads: Vec<PadContext> = descriptor
            .pads
            .iter()
            .filter_map(|p| {
                colors.get(&(p.lx, p.ly)).map(|&rgb| {
                    let wire = crate::template::builtins::color_to_wire(rgb, descriptor.led_palette.as_deref());
                    PadContext {
                        x: p.lx as i64,
                        y: p.ly as i64,
                        // not meaningful for a pure color refresh
                        note_number: 0,
                        red: wire[0] as i64,
                        green: wire[1] as i64,
                        blue: wire[2] as i64,
                    }
                })
            })
            .collect();
        let mut env = Env::new();
        env.set_macros(descriptor.macros.clone())
            .set_row_lengths(descriptor.row_lengths.iter().map(|&n| n as i64).collect());
        match template.evaluate(&env, &pads) {
            Ok(bytes) => {
                send_generational(&bytes, &generation, expected, DEFAULT_INTER_MESSAGE_DELAY, |msg| {
                    output.send_raw(msg)
                });
            }
            Err(e) => log::error!("SetPadColorsBulk evaluation failed: {e}"),
        }
        return;
    }

    let Some(template) = descriptor.set_pad_color.as_ref() else {
        return;
    };
    for pad in &descriptor.pads {
        let Some(&rgb) = colors.get(&(pad.lx, pad.ly)) else {
            continue;
        };
        let wire = crate::template::builtins::color_to_wire(rgb, descriptor.led_palette.as_deref());
        let mut env = Env::new();
        env.set("x", pad.lx as i64)
            .set("y", pad.ly as i64)
            .set("r", wire[0] as i64)
            .set("g", wire[1] as i64)
            .set("b", wire[2] as i64)
            .set_macros(descriptor.macros.clone())
            .set_row_lengths(descriptor.row_lengths.iter().map(|&n| n as i64).collect());
        let bytes = match template.evaluate(&env, &[]) {
            Ok(b) => b,
            Err(e) => {
                log::error!("SetPadColor evaluation failed for pad ({},{}): {e}", pad.lx, pad.ly);
                continue;
            }
        };
        if !send_generational(&bytes, &generation, expected, DEFAULT_INTER_MESSAGE_DELAY, |msg| {
            output.send_raw(msg)
        }) {
            return;
        }
    }
}

/// Spawn the dedicated color-send worker thread (§5): receives full-board color jobs
/// over a channel and runs [`send_pad_colors`] against the shared `ControllerOutput`.
pub fn spawn_color_worker(
    output: Arc<std::sync::Mutex<ControllerOutput>>,
    descriptor: Arc<ControllerDescriptor>,
) -> (std::thread::JoinHandle<()>, flume::Sender<std::collections::HashMap<(i32, i32), [u8; 3]>>) {
    let (tx, rx) = flume::unbounded();
    let handle = std::thread::Builder::new()
        .name("pitchgrid-color-send".into())
        .spawn(move || {
            while let Ok(colors) = rx.recv() {
                let mut guard = output.lock().expect("color output mutex poisoned");
                send_pad_colors(&mut guard, &descriptor, &colors);
            }
        })
        .expect("failed to spawn color-send worker thread");
    (handle, tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Template;

    fn descriptor_with(set_pad_color: &str) -> ControllerDescriptor {
        ControllerDescriptor {
            device_name: "Test".into(),
            midi_device_name: "Test".into(),
            virtual_midi_device_name: "Test Virtual".into(),
            is_mpe: false,
            has_global_pitch_bend: false,
            num_rows: 1,
            row_lengths: vec![1],
            pads: vec![crate::controller::PadGeometry { lx: 0, ly: 0, phys_x: 0.0, phys_y: 0.0 }],
            geometry: crate::layout::Geometry::Rect,
            default_iso_root_coordinate: None,
            set_pad_note_and_channel: None,
            set_pad_color: Some(Template::parse(set_pad_color).unwrap()),
            set_pad_notes_bulk: None,
            set_pad_colors_bulk: None,
            led_palette: None,
            reverse_mapping: Default::default(),
            macros: Default::default(),
        }
    }

    #[test]
    fn send_pad_colors_without_connection_is_harmless() {
        let descriptor = descriptor_with("176 {r} {g}");
        let mut output = ControllerOutput::new(None);
        let mut colors = std::collections::HashMap::new();
        colors.insert((0, 0), [200u8, 100, 50]);
        send_pad_colors(&mut output, &descriptor, &colors);
    }

    #[test]
    fn virtual_output_without_connection_is_harmless() {
        let mut output = VirtualOutput::new(None);
        assert!(!output.is_connected());
        output.send(&[0x90, 60, 100]);
    }
}
