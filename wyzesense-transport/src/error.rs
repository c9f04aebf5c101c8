//! Transport-level error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("poll/read error: {0}")]
    Errno(#[from] nix::errno::Errno),

    #[error("codec error: {0}")]
    Codec(#[from] wyzesense_protocol::CodecError),
}
