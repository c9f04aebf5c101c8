//! Handler table and dispatch (§4.4): routes every parsed packet to at most
//! one handler, auto-ACKing asynchronous non-ACK packets before the handler
//! runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use wyzesense_protocol::{cmd, encode, Packet};

use crate::error::TransportError;
use crate::raw_io::RawIo;

/// A handler invoked with one parsed packet. Must be fast and non-blocking:
/// it runs inline on the receiver thread.
pub type Handler = Arc<dyn Fn(Packet) + Send + Sync>;

/// A handler for the synthetic per-MAC `SENSOR_FOUND` event (§4.7), keyed
/// separately from the command-code table since it has no wire command code
/// of its own.
pub type SensorFoundHandler = Arc<dyn Fn([u8; 8]) + Send + Sync>;

/// Mapping from expected inbound command code to a handler, plus the one
/// named side-channel slot for `SENSOR_FOUND`. Install/remove/swap are
/// atomic under a single lock, so concurrent callers never observe a torn
/// value: a lookup returns either the handler that was there before a swap
/// or the one installed after, never a mix.
#[derive(Default)]
pub struct HandlerTable {
    handlers: Mutex<HashMap<u16, Handler>>,
    sensor_found: Mutex<Option<SensorFoundHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler for `cmd`, returning whatever was installed before
    /// (or `None`). The command engine uses the return value to restore the
    /// prior handler once its wait completes.
    pub fn install(&self, cmd: u16, handler: Handler) -> Option<Handler> {
        self.handlers.lock().insert(cmd, handler)
    }

    /// Remove whatever handler is installed for `cmd`, returning it.
    pub fn remove(&self, cmd: u16) -> Option<Handler> {
        self.handlers.lock().remove(cmd)
    }

    /// Restore a previously-saved handler (or clear the slot if `prior` is
    /// `None`). Used by the command engine to undo its one-shot install.
    pub fn restore(&self, cmd: u16, prior: Option<Handler>) {
        let mut table = self.handlers.lock();
        match prior {
            Some(h) => {
                table.insert(cmd, h);
            }
            None => {
                table.remove(cmd);
            }
        }
    }

    pub fn lookup(&self, cmd: u16) -> Option<Handler> {
        self.handlers.lock().get(&cmd).cloned()
    }

    pub fn install_sensor_found(&self, handler: SensorFoundHandler) -> Option<SensorFoundHandler> {
        self.sensor_found.lock().replace(handler)
    }

    pub fn sensor_found(&self) -> Option<SensorFoundHandler> {
        self.sensor_found.lock().clone()
    }
}

/// Owns the handler table and routes parsed packets to it, per §4.4.
pub struct Dispatcher {
    transport: Arc<dyn RawIo>,
    pub table: Arc<HandlerTable>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn RawIo>, table: Arc<HandlerTable>) -> Self {
        Self { transport, table }
    }

    /// Route one parsed packet: ACK it first if it demands one, then invoke
    /// the matched handler (or drop it with a debug log if none matches). A
    /// failure to write the ACK is logged but never suppresses delivery of
    /// the packet itself to its handler — the ack write and the
    /// notification it accompanies are independent outcomes.
    pub fn dispatch(&self, packet: Packet) -> Result<(), TransportError> {
        let mut ack_result = Ok(());
        if packet.is_async() && !packet.is_async_ack() {
            ack_result = self.send_ack(packet.cmd);
            if let Err(err) = &ack_result {
                warn!(error = %err, cmd = %format!("{:#06x}", packet.cmd), "failed to write ASYNC_ACK, dispatching packet anyway");
            }
        }

        match self.table.lookup(packet.cmd) {
            Some(handler) => {
                trace!(cmd = %format!("{:#06x}", packet.cmd), name = cmd::name(packet.cmd), "dispatching packet");
                handler(packet);
            }
            None => {
                debug!(cmd = %format!("{:#06x}", packet.cmd), name = cmd::name(packet.cmd), "no handler installed, dropping packet");
            }
        }
        ack_result
    }

    fn send_ack(&self, acked: u16) -> Result<(), TransportError> {
        let ack = Packet::ack(acked);
        let wire = encode(&ack).expect("ack packets always encode");
        self.transport.write_all(&wire)
    }
}
