//! Wire codec for the Wyze Sense dongle binary protocol.
//!
//! This crate is pure: it turns a [`Packet`] into bytes and bytes into a
//! [`Packet`], and nothing else. No device I/O, no threads, no handler
//! tables — those live one layer up in `wyzesense-transport`.

pub mod cmd;

use thiserror::Error;
use tracing::trace;

/// Both accepted magic values for an inbound frame; outbound frames always
/// use [`MAGIC_OUTBOUND`].
pub const MAGIC_OUTBOUND: u16 = 0xAA55;
const MAGIC_ALT: u16 = 0x55AA;

/// Fixed 16-byte literal the dongle expects verbatim as the R1 challenge
/// payload during pairing.
pub const SENSOR_R1_CHALLENGE: &[u8; 16] = b"Ok5HPNQ4lf77u754";

/// Maximum payload length a frame can carry (length byte is a single u8).
pub const MAX_PAYLOAD_LEN: usize = 252;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload too long: {0} bytes (max {MAX_PAYLOAD_LEN})")]
    PayloadTooLong(usize),
}

/// A packet's payload: either an opaque byte string, or — for the
/// distinguished ASYNC_ACK code — the 16-bit command code being acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Ack(u16),
}

impl Payload {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(b) => Some(b),
            Payload::Ack(_) => None,
        }
    }

    pub fn as_ack_code(&self) -> Option<u16> {
        match self {
            Payload::Ack(code) => Some(*code),
            Payload::Bytes(_) => None,
        }
    }
}

/// A decoded or to-be-encoded packet: a 16-bit command code plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub cmd: u16,
    pub payload: Payload,
}

impl Packet {
    pub fn new(cmd: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            cmd,
            payload: Payload::Bytes(payload.into()),
        }
    }

    /// Build an ASYNC_ACK packet acknowledging `code`.
    pub fn ack(code: u16) -> Self {
        Self {
            cmd: cmd::ASYNC_ACK,
            payload: Payload::Ack(code),
        }
    }

    pub fn is_async(&self) -> bool {
        cmd::is_async(self.cmd)
    }

    pub fn is_async_ack(&self) -> bool {
        self.cmd == cmd::ASYNC_ACK
    }

    /// The command code `self` is expected to receive a reply on: low byte
    /// plus one, type byte preserved. See the command-engine design notes on
    /// the literal `NOTIFY_SYNC_TIME + 1` question — this helper implements
    /// only the general rule; callers that need the named exception use
    /// `cmd::NOTIFY_SYNC_TIME_ACK` directly instead of this function.
    pub fn reply_code(&self) -> u16 {
        cmd::reply_code(self.cmd)
    }
}

/// Sum every byte unsigned, truncated to 16 bits. Accumulates in a wider
/// integer first so long frames cannot wrap the running sum before the
/// final truncation.
pub fn checksum(bytes: &[u8]) -> u16 {
    let sum: u32 = bytes.iter().fold(0u32, |acc, &b| acc + b as u32);
    (sum & 0xFFFF) as u16
}

/// Encode a packet to its on-wire frame.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&MAGIC_OUTBOUND.to_be_bytes());

    match &packet.payload {
        Payload::Ack(code) => {
            // ASYNC_ACK carries no separate payload bytes: the type byte is
            // always TYPE_ASYNC (every acked code is an async notification)
            // and the length-byte position carries the acked code's low byte.
            let length_byte = (*code & 0xFF) as u8;
            out.push(cmd::TYPE_ASYNC);
            out.push(length_byte);
            out.push(0xFF); // id byte of ASYNC_ACK itself
        }
        Payload::Bytes(payload) => {
            if payload.len() > MAX_PAYLOAD_LEN {
                return Err(CodecError::PayloadTooLong(payload.len()));
            }
            let ty = (packet.cmd >> 8) as u8;
            let id = (packet.cmd & 0xFF) as u8;
            let length_byte = payload.len() as u8 + 3;
            out.push(ty);
            out.push(length_byte);
            out.push(id);
            out.extend_from_slice(payload);
        }
    }

    let sum = checksum(&out);
    out.extend_from_slice(&sum.to_be_bytes());
    Ok(out)
}

/// Result of attempting to decode one frame from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Not enough bytes yet to know whether this is a valid frame.
    Incomplete,
    /// Magic, length, or checksum did not check out.
    Malformed,
    /// A full, checksum-valid frame; `consumed` bytes should be dropped from
    /// the front of the buffer.
    Packet { packet: Packet, consumed: usize },
}

/// Decode the frame starting at the front of `buf`, per §4.1.
pub fn decode(buf: &[u8]) -> DecodeOutcome {
    if buf.len() < 5 {
        return DecodeOutcome::Incomplete;
    }

    let magic = u16::from_be_bytes([buf[0], buf[1]]);
    if magic != MAGIC_OUTBOUND && magic != MAGIC_ALT {
        trace!(magic = %format!("{magic:#06x}"), "bad magic, frame malformed");
        return DecodeOutcome::Malformed;
    }

    let ty = buf[2];
    let length_byte = buf[3];
    let id = buf[4];
    let cmd = ((ty as u16) << 8) | (id as u16);

    if cmd == cmd::ASYNC_ACK {
        const FRAME_SIZE: usize = 7;
        if buf.len() < FRAME_SIZE {
            return DecodeOutcome::Incomplete;
        }
        let expected = checksum(&buf[..FRAME_SIZE - 2]);
        let actual = u16::from_be_bytes([buf[FRAME_SIZE - 2], buf[FRAME_SIZE - 1]]);
        if expected != actual {
            trace!(expected, actual, "ASYNC_ACK checksum mismatch, frame malformed");
            return DecodeOutcome::Malformed;
        }
        let ack_code = ((ty as u16) << 8) | (length_byte as u16);
        return DecodeOutcome::Packet {
            packet: Packet::ack(ack_code),
            consumed: FRAME_SIZE,
        };
    }

    if length_byte < 3 {
        // Payload length would be negative; this cannot be a real frame.
        trace!(length_byte, "length byte below minimum of 3, frame malformed");
        return DecodeOutcome::Malformed;
    }
    let frame_size = length_byte as usize + 4;
    if buf.len() < frame_size {
        return DecodeOutcome::Incomplete;
    }
    let expected = checksum(&buf[..frame_size - 2]);
    let actual = u16::from_be_bytes([buf[frame_size - 2], buf[frame_size - 1]]);
    if expected != actual {
        trace!(expected, actual, cmd = %format!("{cmd:#06x}"), "checksum mismatch, frame malformed");
        return DecodeOutcome::Malformed;
    }

    let payload_len = length_byte as usize - 3;
    let payload = buf[5..5 + payload_len].to_vec();
    DecodeOutcome::Packet {
        packet: Packet {
            cmd,
            payload: Payload::Bytes(payload),
        },
        consumed: frame_size,
    }
}
