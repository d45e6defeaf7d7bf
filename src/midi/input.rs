//! Controller input callback and the remap thread.
//!
//! Two pieces live here, matching the spec's thread split:
//! - the `midir` callback, which only ever parses a fixed-channel note message and
//!   pushes its raw bytes into the bounded [`super::queue`] — it must never block;
//! - [`RemapThread`], the single dedicated consumer that looks up `native_note ->
//!   (lx,ly) -> scale_index` and writes to the virtual output.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use midir::MidiInputConnection;

use crate::error::MidiCoreError;

use super::connection;
use super::queue::{bounded, QueueReceiver, QueueSender};

/// The two tables the remap thread reads on every note message, installed as a unit by
/// the coordinator on every recompute (§3 "Map installation": snapshot semantics).
#[derive(Debug, Clone, Default)]
pub struct MappingSnapshot {
    /// `native_note -> (lx, ly)`.
    pub reverse_mapping: std::collections::HashMap<u8, (i32, i32)>,
    /// `(lx, ly) -> scale_index`.
    pub pad_to_index: std::collections::HashMap<(i32, i32), usize>,
}

/// The narrow one-way interface the remap thread reads through — implemented by the
/// coordinator (see §9 "cyclic references" design note). A plain `ArcSwap`-style
/// snapshot rather than a trait object, since the remap thread only ever needs the
/// latest value and must never block on a lock the coordinator might be holding.
pub trait MappingProvider: Send + Sync {
    fn current_mapping(&self) -> Arc<MappingSnapshot>;
}

/// Where the remap thread reports remapped note activity, for UI/WebSocket push —
/// implemented by the coordinator. Errors raised inside the sink are caught and logged,
/// never propagated into the remap loop (§7 `CallbackRaised`).
pub trait NoteEventSink: Send + Sync {
    fn on_note_event(&self, lx: i32, ly: i32, note_on: bool);
}

/// Aggregate counters for the remap hot path — incremented instead of logging per
/// message, per the real-time discipline in §9.
#[derive(Debug, Default)]
pub struct RemapStats {
    pub notes_remapped: std::sync::atomic::AtomicU64,
    pub notes_dropped: std::sync::atomic::AtomicU64,
    pub passthrough: std::sync::atomic::AtomicU64,
}

/// Connect to the controller's input port and start pushing its raw bytes into the
/// bounded ingress queue. The returned `MidiInputConnection` must be kept alive for the
/// duration of the connection; dropping it disconnects.
pub fn connect_controller_input(
    midi_device_name: &str,
    learned_port_name: Option<&str>,
) -> Result<(MidiInputConnection<QueueSender>, String, QueueReceiver), MidiCoreError> {
    let (midi_in, port, port_name) = connection::find_input_port(midi_device_name, learned_port_name)?;
    let (tx, rx) = bounded();
    let connection = midi_in
        .connect(&port, "pitchgrid-mapper-controller-input", ingress_callback, tx)
        .map_err(|e| MidiCoreError::Connection(e.to_string()))?;
    log::info!("connected controller input on '{port_name}'");
    Ok((connection, port_name, rx))
}

/// The `midir` callback: must never block. Just copies the bytes into the queue.
fn ingress_callback(_timestamp_us: u64, data: &[u8], tx: &mut QueueSender) {
    tx.push(data.to_vec());
}

/// Dequeue timeout: how long the remap thread blocks waiting for the next message
/// before re-checking its shutdown flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// The remap thread itself: single dedicated consumer of the ingress queue, sole writer
/// to the virtual output.
pub struct RemapThread {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    pub stats: Arc<RemapStats>,
}

impl RemapThread {
    /// Spawn the remap thread. `mapping` is read fresh on every message (never cached
    /// locally — that would reintroduce the stale-snapshot problem map installation is
    /// meant to avoid). `send_virtual_out` is the only function ever allowed to write
    /// to the virtual output port.
    pub fn spawn(
        queue: QueueReceiver,
        mapping: Arc<dyn MappingProvider>,
        sink: Arc<dyn NoteEventSink>,
        mut send_virtual_out: impl FnMut(&[u8]) + Send + 'static,
    ) -> Self {
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stats = Arc::new(RemapStats::default());
        let thread_shutdown = shutdown.clone();
        let thread_stats = stats.clone();

        let handle = std::thread::Builder::new()
            .name("pitchgrid-remap".into())
            .spawn(move || {
                raise_thread_priority();
                while !thread_shutdown.load(std::sync::atomic::Ordering::Relaxed) {
                    let Some(message) = queue.recv_timeout(RECV_TIMEOUT) else {
                        continue;
                    };
                    process_message(&message.bytes, &mapping, &sink, &mut send_virtual_out, &thread_stats);
                }
            })
            .expect("failed to spawn remap thread");

        RemapThread { handle: Some(handle), shutdown, stats }
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RemapThread {
    fn drop(&mut self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Core remap logic, split out of the thread loop so it's directly unit-testable
/// without spinning up a thread or a real MIDI port.
fn process_message(
    bytes: &[u8],
    mapping: &Arc<dyn MappingProvider>,
    sink: &Arc<dyn NoteEventSink>,
    send_virtual_out: &mut impl FnMut(&[u8]),
    stats: &RemapStats,
) {
    use std::sync::atomic::Ordering;

    if bytes.len() != 3 {
        send_virtual_out(bytes);
        stats.passthrough.fetch_add(1, Ordering::Relaxed);
        return;
    }
    let status = bytes[0];
    let kind = status & 0xF0;
    let channel = status & 0x0F;
    let is_note_on = kind == 0x90 && bytes[2] > 0;
    let is_note_off = kind == 0x80 || (kind == 0x90 && bytes[2] == 0);
    if !is_note_on && !is_note_off {
        send_virtual_out(bytes);
        stats.passthrough.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let native_note = bytes[1];
    let snapshot = mapping.current_mapping();
    let Some(&(lx, ly)) = snapshot.reverse_mapping.get(&native_note) else {
        stats.notes_dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };
    let Some(&index) = snapshot.pad_to_index.get(&(lx, ly)) else {
        stats.notes_dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let status_with_channel = kind | channel;
    send_virtual_out(&[status_with_channel, index as u8, bytes[2]]);
    stats.notes_remapped.fetch_add(1, Ordering::Relaxed);
    sink.on_note_event(lx, ly, is_note_on);
}

/// Bump the remap thread to elevated priority where the platform permits it (§5).
/// A best-effort call: failure just means the thread runs at normal priority.
#[cfg(all(target_os = "linux", feature = "embedded-rt"))]
fn raise_thread_priority() {
    const SCHED_FIFO: libc::c_int = 1;
    unsafe {
        let params = libc::sched_param { sched_priority: 10 };
        if libc::sched_setscheduler(0, SCHED_FIFO, &params) != 0 {
            log::debug!("could not raise remap thread to SCHED_FIFO (requires elevated privileges)");
        }
    }
}

#[cfg(not(all(target_os = "linux", feature = "embedded-rt")))]
fn raise_thread_priority() {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedMapping(Arc<MappingSnapshot>);
    impl MappingProvider for FixedMapping {
        fn current_mapping(&self) -> Arc<MappingSnapshot> {
            self.0.clone()
        }
    }

    struct RecordingSink(Mutex<Vec<(i32, i32, bool)>>);
    impl NoteEventSink for RecordingSink {
        fn on_note_event(&self, lx: i32, ly: i32, note_on: bool) {
            self.0.lock().unwrap().push((lx, ly, note_on));
        }
    }

    fn snapshot() -> Arc<MappingSnapshot> {
        let mut reverse_mapping = HashMap::new();
        reverse_mapping.insert(60u8, (0, 0));
        let mut pad_to_index = HashMap::new();
        pad_to_index.insert((0, 0), 64usize);
        Arc::new(MappingSnapshot { reverse_mapping, pad_to_index })
    }

    #[test]
    fn note_on_remaps_to_scale_index_and_emits_event() {
        let mapping: Arc<dyn MappingProvider> = Arc::new(FixedMapping(snapshot()));
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let sink_dyn: Arc<dyn NoteEventSink> = sink.clone();
        let stats = RemapStats::default();
        let mut sent = Vec::new();
        process_message(&[0x90, 60, 100], &mapping, &sink_dyn, &mut |b| sent.push(b.to_vec()), &stats);
        assert_eq!(sent, vec![vec![0x90, 64, 100]]);
        assert_eq!(sink.0.lock().unwrap().as_slice(), &[(0, 0, true)]);
        assert_eq!(stats.notes_remapped.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn unmapped_note_is_dropped_not_passed_through() {
        let mapping: Arc<dyn MappingProvider> = Arc::new(FixedMapping(snapshot()));
        let sink: Arc<dyn NoteEventSink> = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let stats = RemapStats::default();
        let mut sent = Vec::new();
        process_message(&[0x90, 61, 100], &mapping, &sink, &mut |b| sent.push(b.to_vec()), &stats);
        assert!(sent.is_empty());
        assert_eq!(stats.notes_dropped.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn note_on_velocity_zero_is_treated_as_note_off() {
        let mapping: Arc<dyn MappingProvider> = Arc::new(FixedMapping(snapshot()));
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let sink_dyn: Arc<dyn NoteEventSink> = sink.clone();
        let stats = RemapStats::default();
        let mut sent = Vec::new();
        process_message(&[0x90, 60, 0], &mapping, &sink_dyn, &mut |b| sent.push(b.to_vec()), &stats);
        assert_eq!(sent, vec![vec![0x80, 64, 0]]);
        assert_eq!(sink.0.lock().unwrap().as_slice(), &[(0, 0, false)]);
    }

    #[test]
    fn non_note_messages_pass_through_unchanged() {
        let mapping: Arc<dyn MappingProvider> = Arc::new(FixedMapping(snapshot()));
        let sink: Arc<dyn NoteEventSink> = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let stats = RemapStats::default();
        let mut sent = Vec::new();
        process_message(&[0xB0, 7, 100], &mapping, &sink, &mut |b| sent.push(b.to_vec()), &stats);
        assert_eq!(sent, vec![vec![0xB0, 7, 100]]);
        assert_eq!(stats.passthrough.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
