//! Command engine (§4.5): issue an outbound command, install a one-shot
//! handler for its expected reply code, wait with a timeout, then restore
//! whatever handler was there before.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};
use wyzesense_protocol::{cmd, encode, Packet};

use crate::dispatcher::HandlerTable;
use crate::error::TransportError;
use crate::raw_io::RawIo;

/// Default timeout for a single-reply command (§4.5).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// A broadcastable one-shot completion signal. `notify_all` on `Stop` (§5,
/// cancellation) wakes every waiter currently blocked in `wait`, which is why
/// this is a condvar rather than a plain oneshot channel.
#[derive(Default)]
struct Signal {
    fired: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fire(&self) {
        *self.fired.lock() = true;
        self.condvar.notify_all();
    }

    /// Block until fired or `timeout` elapses. Returns whether it fired.
    fn wait(&self, timeout: Duration) -> bool {
        let mut fired = self.fired.lock();
        let deadline = Instant::now() + timeout;
        while !*fired {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let result = self.condvar.wait_for(&mut fired, remaining);
            if result.timed_out() && !*fired {
                return false;
            }
        }
        true
    }
}

/// Serializes outbound writes and shares the handler table with the
/// dispatcher. One instance per session; cheap to clone via `Arc`.
pub struct CommandEngine {
    transport: Arc<dyn RawIo>,
    table: Arc<HandlerTable>,
    write_lock: Mutex<()>,
    /// Every pending signal, so `notify_stop` can wake them all without the
    /// receiver forcing anything — this is the "MAY additionally notify"
    /// option from §5's cancellation note, taken.
    pending: Mutex<Vec<Arc<Signal>>>,
}

impl CommandEngine {
    pub fn new(transport: Arc<dyn RawIo>, table: Arc<HandlerTable>) -> Self {
        Self {
            transport,
            table,
            write_lock: Mutex::new(()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Wake every signal currently being waited on. Called from `Stop`.
    pub fn notify_stop(&self) {
        let pending = self.pending.lock();
        for signal in pending.iter() {
            signal.fire();
        }
    }

    fn write(&self, packet: &Packet) -> Result<(), TransportError> {
        let wire = encode(packet).map_err(TransportError::Codec)?;
        let _guard = self.write_lock.lock();
        self.transport.write_all(&wire)
    }

    fn track(&self, signal: &Arc<Signal>) {
        self.pending.lock().push(signal.clone());
    }

    fn untrack(&self, signal: &Arc<Signal>) {
        self.pending.lock().retain(|s| !Arc::ptr_eq(s, signal));
    }

    /// Issue `request`, install `on_reply` on `request.reply_code()`, wait up
    /// to `timeout`, then restore the prior handler. `on_reply` is called
    /// inline on the receiver thread for every matching reply while the
    /// handler is installed — for a single-reply command it should capture
    /// the packet and fire the signal; for a multi-reply command it should
    /// accumulate and fire only once complete (see `session`'s `List`).
    pub fn do_command(
        &self,
        request: Packet,
        on_reply: impl Fn(Packet, &dyn Fn()) + Send + Sync + 'static,
        timeout: Duration,
    ) -> bool {
        let reply_code = request.reply_code();
        let signal = Signal::new();
        let signal_for_handler = signal.clone();

        let wrapper = Arc::new(move |packet: Packet| {
            let fire = || signal_for_handler.fire();
            on_reply(packet, &fire);
        });

        let prior = self.table.install(reply_code, wrapper);
        self.track(&signal);

        trace!(cmd = cmd::name(request.cmd), reply = cmd::name(reply_code), "issuing command");
        let write_result = self.write(&request);

        let fired = if write_result.is_ok() {
            signal.wait(timeout)
        } else {
            debug!(cmd = cmd::name(request.cmd), "write failed, not waiting for reply");
            false
        };

        self.table.restore(reply_code, prior);
        self.untrack(&signal);
        fired
    }

    /// Single-reply convenience: returns the first matching reply, or `None`
    /// on timeout.
    pub fn do_simple(&self, request: Packet, timeout: Duration) -> Option<Packet> {
        let captured: Arc<Mutex<Option<Packet>>> = Arc::new(Mutex::new(None));
        let captured_for_handler = captured.clone();

        let fired = self.do_command(
            request,
            move |packet, fire| {
                *captured_for_handler.lock() = Some(packet);
                fire();
            },
            timeout,
        );

        if fired {
            captured.lock().take()
        } else {
            None
        }
    }
}
