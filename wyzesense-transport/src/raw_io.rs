//! The HID transport seam (§4.2): blocking/non-blocking reads and writes
//! against the device file, producing raw HID report fragments.

use std::fs::OpenOptions;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd::{read, write};
use tracing::{debug, warn};

use crate::error::TransportError;

/// One report's worth of raw bytes, typically 64 per the dongle's HID
/// descriptor.
pub const REPORT_SIZE: usize = 64;

/// Seam the reassembler reads from and the command engine/dispatcher write
/// through. A real device and an in-memory fake both implement it.
pub trait RawIo: Send + Sync {
    /// Fetch up to one report's worth of bytes. An empty vec means "nothing
    /// available right now" (transient, caller should retry after a short
    /// sleep); it is not an error.
    fn read_chunk(&self) -> Result<Vec<u8>, TransportError>;

    /// Write a complete frame. Writes are serialized by the caller (the
    /// command engine's write lock), not by this trait.
    fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// A raw Linux HID character device (`/dev/hidrawN`), opened directly in
/// non-blocking read/write mode. No userspace HID enumeration library is
/// involved — this talks to the char device with `nix`'s `read`/`write`/
/// `poll` wrappers, matching the dongle's fixed 64-byte report contract.
pub struct HidRawDevice {
    fd: OwnedFd,
}

impl HidRawDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let fd: OwnedFd = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)
            .map_err(|e| {
                warn!(?path, error = %e, "failed to open hidraw device");
                TransportError::Io(e)
            })?
            .into();
        debug!(?path, "opened hidraw device");
        Ok(Self { fd })
    }

    /// Poll for readability with a short timeout, then read once. Returns an
    /// empty vec on timeout or EAGAIN/EINPROGRESS — both are the "transient,
    /// retry" outcome described in §4.2/§7.
    fn read_once(&self, poll_timeout_ms: i32) -> Result<Vec<u8>, TransportError> {
        let pollfd = PollFd::new(&self.fd.as_fd(), PollFlags::POLLIN);
        let mut fds = [pollfd];
        let ready = poll(&mut fds, poll_timeout_ms)?;
        if ready == 0 {
            return Ok(Vec::new());
        }

        if let Some(events) = fds[0].revents() {
            if events.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
                return Err(TransportError::Disconnected);
            }
        }

        let mut buf = [0u8; REPORT_SIZE];
        match read(self.fd.as_raw_fd(), &mut buf) {
            Ok(0) => Ok(Vec::new()),
            Ok(n) => {
                // First byte is the fragment length, clamped to 63.
                let fragment_len = (buf[0] as usize).min(REPORT_SIZE - 1);
                let available = n.saturating_sub(1).min(fragment_len);
                Ok(buf[1..1 + available].to_vec())
            }
            Err(Errno::EAGAIN) | Err(Errno::EINPROGRESS) => Ok(Vec::new()),
            Err(e) => Err(TransportError::Errno(e)),
        }
    }
}

impl RawIo for HidRawDevice {
    fn read_chunk(&self) -> Result<Vec<u8>, TransportError> {
        // 100ms matches §4.2's "sleeps ~100ms and retries" cadence, folded
        // into the poll timeout instead of a separate sleep.
        self.read_once(100)
    }

    fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError> {
        match write(self.fd.as_raw_fd(), bytes) {
            Ok(_) => Ok(()),
            Err(e) => Err(TransportError::Errno(e)),
        }
    }
}
