//! Crate-level error type unifying transport, codec, and session failures
//! (§7: transport-transient and frame-malformed conditions never surface
//! here — they're recovered below this layer).

use thiserror::Error;
use wyzesense_transport::TransportError;

#[derive(Error, Debug)]
pub enum DongleError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// One of the ordered handshake steps (§4.6) failed or timed out.
    #[error("handshake step {step} failed: {reason}")]
    Handshake { step: &'static str, reason: String },

    /// A reply's shape didn't match what the operation expected (e.g. a
    /// `DEL_SENSOR` ack whose MAC or status byte didn't match).
    #[error("protocol mismatch in {op}: {reason}")]
    ProtocolMismatch { op: &'static str, reason: String },

    /// No reply arrived within the operation's timeout; session remains
    /// usable (§7, protocol-timeout).
    #[error("{op} timed out")]
    Timeout { op: &'static str },

    /// The session's receiver has already torn down (fatal transport error
    /// or a prior `Stop`); further operations are rejected immediately.
    #[error("session is no longer running")]
    SessionStopped,
}
