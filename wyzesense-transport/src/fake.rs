//! An in-memory [`RawIo`] fake used by this crate's and `wyzesense`'s tests
//! to drive the dispatcher/command engine/session controller without a real
//! hidraw device. Not behind `#[cfg(test)]` so downstream crates can reuse
//! it for their own scenario tests (matches the teacher workspace's own
//! practice of shipping a reusable fake transport alongside the real one).

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::error::TransportError;
use crate::raw_io::RawIo;

/// A transport backed by two in-memory queues: `inbound` is what
/// [`RawIo::read_chunk`] drains (bytes a test script pushes to simulate the
/// dongle), `outbound` records everything written (so a test can assert
/// which frames the engine under test sent).
#[derive(Default)]
pub struct FakeTransport {
    inbound: Mutex<VecDeque<u8>>,
    inbound_ready: Condvar,
    outbound: Mutex<Vec<Vec<u8>>>,
    disconnected: Mutex<bool>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if the dongle had sent them; wakes a blocked reader.
    pub fn push_inbound(&self, bytes: &[u8]) {
        let mut queue = self.inbound.lock();
        queue.extend(bytes.iter().copied());
        self.inbound_ready.notify_all();
    }

    /// Every frame written so far, in order.
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        self.outbound.lock().clone()
    }

    pub fn disconnect(&self) {
        *self.disconnected.lock() = true;
        self.inbound_ready.notify_all();
    }
}

impl RawIo for FakeTransport {
    fn read_chunk(&self) -> Result<Vec<u8>, TransportError> {
        let mut queue = self.inbound.lock();
        if *self.disconnected.lock() {
            return Err(TransportError::Disconnected);
        }
        if queue.is_empty() {
            // Wait briefly for a test to push bytes rather than busy-spin;
            // an empty read is still a valid, benign outcome per §4.2.
            self.inbound_ready
                .wait_for(&mut queue, std::time::Duration::from_millis(20));
            if queue.is_empty() {
                return Ok(Vec::new());
            }
        }
        const CHUNK: usize = 64;
        let n = queue.len().min(CHUNK);
        Ok(queue.drain(..n).collect())
    }

    fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.outbound.lock().push(bytes.to_vec());
        Ok(())
    }
}
