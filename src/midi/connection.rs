//! MIDI port discovery and connection lifecycle.
//!
//! Three kinds of port matter here: the controller's input port (pad presses in), its
//! optional output port (setup/color sends out), and the virtual output port facing the
//! downstream synth. All three are opened through `midir`, matched by the normalized
//! substring rules in [`super::ports`].

use midir::{MidiInput, MidiInputPort, MidiOutput, MidiOutputConnection, MidiOutputPort};

use crate::error::MidiCoreError;

use super::ports::port_matches;

/// List currently available MIDI input port names.
pub fn list_input_ports() -> Result<Vec<String>, MidiCoreError> {
    let midi_in = MidiInput::new("pitchgrid-mapper-list-in")
        .map_err(|e| MidiCoreError::InputInit(e.to_string()))?;
    Ok(midi_in.ports().iter().filter_map(|p| midi_in.port_name(p).ok()).collect())
}

/// List currently available MIDI output port names.
pub fn list_output_ports() -> Result<Vec<String>, MidiCoreError> {
    let midi_out = MidiOutput::new("pitchgrid-mapper-list-out")
        .map_err(|e| MidiCoreError::OutputInit(e.to_string()))?;
    Ok(midi_out.ports().iter().filter_map(|p| midi_out.port_name(p).ok()).collect())
}

/// Find the input port whose name matches `midi_device_name` (exact-learned-name first,
/// then normalized substring), returning the `MidiInput` handle and the matched port so
/// the caller can `.connect()` it with its own callback.
pub fn find_input_port(
    midi_device_name: &str,
    learned_port_name: Option<&str>,
) -> Result<(MidiInput, MidiInputPort, String), MidiCoreError> {
    let midi_in =
        MidiInput::new("pitchgrid-mapper-in").map_err(|e| MidiCoreError::InputInit(e.to_string()))?;
    let ports = midi_in.ports();
    if ports.is_empty() {
        return Err(MidiCoreError::NoInputPorts);
    }
    let port = ports
        .into_iter()
        .find(|p| {
            midi_in
                .port_name(p)
                .map(|name| port_matches(&name, learned_port_name, midi_device_name))
                .unwrap_or(false)
        })
        .ok_or_else(|| MidiCoreError::PortNotFound(midi_device_name.to_string()))?;
    let name = midi_in.port_name(&port).map_err(|e| MidiCoreError::PortInfo(e.to_string()))?;
    Ok((midi_in, port, name))
}

/// Find and connect the controller's output port (setup/color sends), if one matches.
/// Optional by design — not every controller declares outbound templates.
pub fn connect_output(midi_device_name: &str, learned_port_name: Option<&str>) -> Option<MidiOutputConnection> {
    let midi_out = MidiOutput::new("pitchgrid-mapper-ctrl-out")
        .map_err(|e| log::warn!("failed to initialize MIDI output for controller send: {e}"))
        .ok()?;
    let port = find_matching_output_port(&midi_out, midi_device_name, learned_port_name)?;
    match midi_out.connect(&port, "pitchgrid-mapper-controller-output") {
        Ok(conn) => Some(conn),
        Err(e) => {
            log::warn!("failed to connect controller output port: {e}");
            None
        }
    }
}

fn find_matching_output_port(
    midi_out: &MidiOutput,
    midi_device_name: &str,
    learned_port_name: Option<&str>,
) -> Option<MidiOutputPort> {
    midi_out.ports().into_iter().find(|p| {
        midi_out
            .port_name(p)
            .map(|name| port_matches(&name, learned_port_name, midi_device_name))
            .unwrap_or(false)
    })
}

/// Open the virtual MIDI output facing the downstream synth.
///
/// Preferring an existing port of the same name keeps behavior sane on platforms (e.g.
/// Windows without loopMIDI) where this process can't create user-space virtual ports
/// itself but a matching loopback port may already exist; otherwise attempt to create
/// one. Absence is not fatal — `None` means "egress is a no-op", per §7's
/// `PortUnavailable` policy.
pub fn open_virtual_output(name: &str) -> Option<MidiOutputConnection> {
    let midi_out = MidiOutput::new("pitchgrid-mapper-virtual-out")
        .map_err(|e| log::error!("failed to initialize virtual MIDI output: {e}"))
        .ok()?;

    if let Some(existing) = midi_out.ports().into_iter().find(|p| {
        midi_out.port_name(p).map(|n| n == name).unwrap_or(false)
    }) {
        return match midi_out.connect(&existing, "pitchgrid-mapper") {
            Ok(conn) => {
                log::info!("attached to existing virtual output port '{name}'");
                Some(conn)
            }
            Err(e) => {
                log::error!("failed to attach to existing virtual output port '{name}': {e}");
                None
            }
        };
    }

    match midi_out.create_virtual(name) {
        Ok(conn) => {
            log::info!("created virtual output port '{name}'");
            Some(conn)
        }
        Err(e) => {
            log::warn!("virtual MIDI output '{name}' unavailable on this platform: {e}; egress is a no-op");
            None
        }
    }
}
