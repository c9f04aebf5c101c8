//! The dedicated receiver thread (§5): owns the rolling buffer, drives the
//! reassembler, and dispatches parsed packets inline. Never blocks on
//! caller code beyond the handler body itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, warn};

use crate::dispatcher::Dispatcher;
use crate::error::TransportError;
use crate::raw_io::RawIo;
use crate::reassembler::Reassembler;

/// Spawns and owns the background receiver thread for one session. Dropping
/// this without calling `stop` leaves the thread running until the next
/// fatal transport error; callers should always pair `spawn` with `stop`.
pub struct Receiver {
    exit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Receiver {
    /// Start the receiver loop on its own thread. `on_fatal` is invoked
    /// (from the receiver thread) if the transport reports a fatal error, so
    /// the session controller can mark itself dead.
    pub fn spawn(
        transport: Arc<dyn RawIo>,
        dispatcher: Dispatcher,
        on_fatal: impl Fn(&TransportError) + Send + 'static,
    ) -> Self {
        let exit = Arc::new(AtomicBool::new(false));
        let exit_for_thread = exit.clone();

        let handle = thread::Builder::new()
            .name("wyzesense-receiver".into())
            .spawn(move || {
                run_loop(transport, dispatcher, exit_for_thread, on_fatal);
            })
            .expect("failed to spawn receiver thread");

        Self {
            exit,
            handle: Some(handle),
        }
    }

    /// Set the exit flag and join the thread. Idempotent.
    pub fn stop(&mut self) {
        self.exit.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    transport: Arc<dyn RawIo>,
    dispatcher: Dispatcher,
    exit: Arc<AtomicBool>,
    on_fatal: impl Fn(&TransportError),
) {
    let mut reassembler = Reassembler::new();

    loop {
        if exit.load(Ordering::SeqCst) {
            return;
        }

        let chunk = match transport.read_chunk() {
            Ok(chunk) => chunk,
            Err(err @ TransportError::Disconnected) => {
                error!(error = %err, "transport disconnected, receiver exiting");
                on_fatal(&err);
                return;
            }
            Err(err) => {
                warn!(error = %err, "transient read error");
                continue;
            }
        };

        if chunk.is_empty() {
            continue;
        }

        reassembler.feed(&chunk);
        for packet in reassembler.drain() {
            if let Err(err) = dispatcher.dispatch(packet) {
                warn!(error = %err, "failed to write auto-ack");
            }
        }
    }
}
