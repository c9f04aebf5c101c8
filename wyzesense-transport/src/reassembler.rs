//! Reassembler (§4.3): turns a stream of raw HID report fragments into a
//! sequence of parsed packets, resynchronizing after garbage or malformed
//! frames instead of stalling.

use tracing::{trace, warn};
use wyzesense_protocol::{decode, DecodeOutcome, Packet};

const MAGIC_BYTES: [u8; 2] = [0x55, 0xAA];

/// Rolling receive buffer plus the resync/decode loop described in §4.3.
/// Pure and synchronous: callers feed it chunks and drain parsed packets,
/// no I/O happens here.
#[derive(Default)]
pub struct Reassembler {
    buf: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append a freshly-read chunk to the buffer.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Drain as many complete packets as currently sit in the buffer,
    /// dropping garbage prefixes and malformed frames along the way. Stops
    /// as soon as the remaining buffer is `Incomplete`, since that can only
    /// be resolved by feeding more bytes.
    pub fn drain(&mut self) -> Vec<Packet> {
        let mut out = Vec::new();
        loop {
            match self.find_magic() {
                None => {
                    // No magic anywhere in the buffer. Keep the trailing byte
                    // in case it is the first half of a split magic.
                    if self.buf.len() > 1 {
                        let keep = self.buf[self.buf.len() - 1];
                        self.buf.clear();
                        self.buf.push(keep);
                    }
                    return out;
                }
                Some(0) => {}
                Some(offset) => {
                    trace!(offset, "discarding garbage prefix before magic");
                    self.buf.drain(..offset);
                }
            }

            match decode(&self.buf) {
                DecodeOutcome::Incomplete => return out,
                DecodeOutcome::Malformed => {
                    warn!("malformed frame at buffer head, advancing past magic");
                    let drop = self.buf.len().min(2);
                    self.buf.drain(..drop);
                }
                DecodeOutcome::Packet { packet, consumed } => {
                    self.buf.drain(..consumed);
                    out.push(packet);
                }
            }
        }
    }

    fn find_magic(&self) -> Option<usize> {
        self.buf
            .windows(2)
            .position(|w| w == MAGIC_BYTES || w == [MAGIC_BYTES[1], MAGIC_BYTES[0]])
    }
}
