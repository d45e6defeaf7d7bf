//! Real-time MIDI I/O core: port discovery, the bounded ingress queue, the remap
//! thread, and controller wire egress.
//!
//! Split along the same lines the spec's thread model draws: [`connection`] only ever
//! opens and matches ports, [`queue`] carries raw bytes from the controller-input
//! callback to [`input`]'s remap thread, and [`output`] owns every write back out to
//! either the controller or the virtual synth-facing port.

pub mod connection;
pub mod egress;
pub mod input;
pub mod output;
pub mod ports;
pub mod queue;

pub use input::{MappingProvider, MappingSnapshot, NoteEventSink, RemapStats, RemapThread};
pub use output::{ControllerOutput, VirtualOutput};
