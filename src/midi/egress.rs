//! Controller wire egress: framing an arbitrary byte stream into individual MIDI
//! messages, pacing sends to the device, and cancelling a color send that's gone stale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default spacing between individual messages sent to a controller, so a bulk setup
/// or color-refresh send doesn't overrun the device's input buffer.
pub const DEFAULT_INTER_MESSAGE_DELAY: Duration = Duration::from_micros(1500);

/// Split a byte stream into individual MIDI messages: SysEx (`F0...F7`), channel
/// messages (status + 1 data byte for program-change/channel-pressure, else 2), system
/// common (length by status), and single-byte real-time.
pub fn parse_messages(data: &[u8]) -> Vec<Vec<u8>> {
    let mut messages = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let status = data[i];
        if status == 0xF0 {
            match data[i..].iter().position(|&b| b == 0xF7) {
                Some(offset) => {
                    let end = i + offset;
                    messages.push(data[i..=end].to_vec());
                    i = end + 1;
                }
                None => {
                    messages.push(data[i..].to_vec());
                    i = data.len();
                }
            }
        } else if (0x80..=0xEF).contains(&status) {
            let data_bytes = match status & 0xF0 {
                0xC0 | 0xD0 => 1,
                _ => 2,
            };
            let end = (i + 1 + data_bytes).min(data.len());
            messages.push(data[i..end].to_vec());
            i = end;
        } else if (0xF1..=0xF7).contains(&status) {
            let len = match status {
                0xF1 | 0xF3 => 2,
                0xF2 => 3,
                _ => 1,
            };
            let end = (i + len).min(data.len());
            messages.push(data[i..end].to_vec());
            i = end;
        } else if status >= 0xF8 {
            messages.push(vec![status]);
            i += 1;
        } else {
            // stray data byte with no preceding status; drop it.
            i += 1;
        }
    }
    messages
}

/// A generation counter guarding in-flight color/setup sends.
///
/// `cancel()` bumps it; a running send compares its captured generation against the
/// current one between every message and aborts cleanly on mismatch. This keeps a
/// stale color stream from interleaving with a fresh one when tuning or transform
/// edits arrive faster than a send can complete.
#[derive(Clone)]
pub struct Generation {
    counter: Arc<AtomicU64>,
}

impl Generation {
    pub fn new() -> Self {
        Generation { counter: Arc::new(AtomicU64::new(0)) }
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Invalidate any send in flight; returns the new generation.
    pub fn cancel(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for Generation {
    fn default() -> Self {
        Self::new()
    }
}

/// Send `bytes` as a sequence of framed messages via `send`, pacing with `delay`
/// between each and checking `generation` for cancellation before each send.
///
/// Returns `true` if the full stream was sent, `false` if it was cancelled partway.
pub fn send_generational(
    bytes: &[u8],
    generation: &Generation,
    expected: u64,
    delay: Duration,
    mut send: impl FnMut(&[u8]),
) -> bool {
    for message in parse_messages(bytes) {
        if generation.current() != expected {
            return false;
        }
        send(&message);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_sysex_and_channel_messages() {
        let bytes = [0xF0, 0x7D, 0x01, 0xF7, 0x90, 60, 100];
        let messages = parse_messages(&bytes);
        assert_eq!(messages, vec![vec![0xF0, 0x7D, 0x01, 0xF7], vec![0x90, 60, 100]]);
    }

    #[test]
    fn program_change_takes_one_data_byte() {
        let bytes = [0xC0, 5, 0x90, 60, 100];
        let messages = parse_messages(&bytes);
        assert_eq!(messages, vec![vec![0xC0, 5], vec![0x90, 60, 100]]);
    }

    #[test]
    fn real_time_bytes_are_single_byte_messages() {
        let bytes = [0xF8, 0xFA, 0x90, 1, 2];
        let messages = parse_messages(&bytes);
        assert_eq!(messages, vec![vec![0xF8], vec![0xFA], vec![0x90, 1, 2]]);
    }

    #[test]
    fn system_common_lengths_match_status() {
        let bytes = [0xF2, 1, 2, 0xF6];
        let messages = parse_messages(&bytes);
        assert_eq!(messages, vec![vec![0xF2, 1, 2], vec![0xF6]]);
    }

    #[test]
    fn cancelled_generation_stops_send_cleanly() {
        let generation = Generation::new();
        let expected = generation.current();
        let mut sent = Vec::new();
        let bytes = [0x90u8, 1, 2, 0x90, 3, 4, 0x90, 5, 6];
        let completed = send_generational(&bytes, &generation, expected, Duration::ZERO, |msg| {
            sent.push(msg.to_vec());
            if sent.len() == 1 {
                generation.cancel();
            }
        });
        assert!(!completed);
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn uncancelled_generation_sends_everything() {
        let generation = Generation::new();
        let expected = generation.current();
        let mut sent = Vec::new();
        let bytes = [0x90u8, 1, 2, 0x90, 3, 4];
        let completed = send_generational(&bytes, &generation, expected, Duration::ZERO, |msg| {
            sent.push(msg.to_vec());
        });
        assert!(completed);
        assert_eq!(sent.len(), 2);
    }
}
