//! HID transport, reassembler, dispatcher, and command engine for the Wyze
//! Sense dongle (§4.2-§4.5). Owns the receiver thread and all raw device
//! I/O; the session controller and event surface live one layer up in the
//! `wyzesense` crate.

pub mod command;
pub mod dispatcher;
pub mod error;
pub mod fake;
pub mod raw_io;
pub mod reassembler;
pub mod receiver;

pub use command::{CommandEngine, DEFAULT_TIMEOUT};
pub use dispatcher::{Dispatcher, Handler, HandlerTable, SensorFoundHandler};
pub use error::TransportError;
pub use fake::FakeTransport;
pub use raw_io::{HidRawDevice, RawIo, REPORT_SIZE};
pub use receiver::Receiver;
pub use reassembler::Reassembler;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use wyzesense_protocol::{cmd, encode, Packet};

    /// §8 "Auto-ACK": every received ASYNC non-ACK packet causes exactly
    /// one ASYNC_ACK write before the handler runs.
    #[test]
    fn auto_ack_precedes_handler_invocation() {
        let transport = Arc::new(FakeTransport::new());
        let table = Arc::new(HandlerTable::new());
        let dispatcher = Dispatcher::new(transport.clone(), table.clone());

        let handler_saw_ack_first = Arc::new(AtomicUsize::new(0));
        let flag = handler_saw_ack_first.clone();
        let transport_for_handler = transport.clone();
        table.install(
            cmd::NOTIFY_SENSOR_ALARM,
            Arc::new(move |_packet: Packet| {
                if transport_for_handler.written_frames().len() == 1 {
                    flag.store(1, Ordering::SeqCst);
                }
            }),
        );

        let packet = Packet::new(cmd::NOTIFY_SENSOR_ALARM, vec![0u8; 26]);
        dispatcher.dispatch(packet).unwrap();

        assert_eq!(transport.written_frames().len(), 1);
        assert_eq!(handler_saw_ack_first.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_with_no_handler_is_silently_dropped() {
        let transport = Arc::new(FakeTransport::new());
        let table = Arc::new(HandlerTable::new());
        let dispatcher = Dispatcher::new(transport.clone(), table);

        let packet = Packet::new(cmd::GET_DONGLE_VERSION, b"V1.0".to_vec());
        dispatcher.dispatch(packet).unwrap();
        // A SYNC packet never triggers an auto-ack.
        assert!(transport.written_frames().is_empty());
    }

    #[test]
    fn handler_restore_returns_table_to_prior_state() {
        let transport = Arc::new(FakeTransport::new());
        let table = Arc::new(HandlerTable::new());

        let permanent: Handler = Arc::new(|_| {});
        table.install(cmd::GET_MAC, permanent.clone());

        let prior = table.install(cmd::GET_MAC, Arc::new(|_| {}));
        assert!(prior.is_some());
        table.restore(cmd::GET_MAC, prior);

        // Installing again returns the restored (original) permanent handler
        // pointer-identically is not checkable without Fn comparison, but we
        // can at least assert a handler is present.
        assert!(table.lookup(cmd::GET_MAC).is_some());
        let _ = transport;
    }

    /// End-to-end through the receiver: a command engine writes a request,
    /// a short-lived thread injects the canned reply into the fake's
    /// inbound queue, and `do_simple` returns it within its timeout.
    #[test]
    fn do_simple_round_trips_through_receiver() {
        let fake = Arc::new(FakeTransport::new());
        let transport: Arc<dyn RawIo> = fake.clone();
        let table = Arc::new(HandlerTable::new());
        let dispatcher = Dispatcher::new(transport.clone(), table.clone());
        let engine = CommandEngine::new(transport.clone(), table.clone());

        let mut receiver = Receiver::spawn(transport.clone(), dispatcher, |_| {});

        let reply = Packet::new(
            cmd::reply_code(cmd::GET_MAC),
            b"\xAA\xBB\xCC\xDD\xEE\xFF\x00\x11".to_vec(),
        );
        let wire = encode(&reply).unwrap();

        // Give do_simple a head start installing its handler before the
        // reply lands, matching the real timing where the dongle's reply
        // always trails the request on the wire.
        let fake_push = fake.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            fake_push.push_inbound(&wire);
        });

        let result = engine.do_simple(Packet::new(cmd::GET_MAC, Vec::new()), Duration::from_secs(1));
        assert!(result.is_some());
        assert_eq!(result.unwrap().payload.as_bytes().unwrap().len(), 8);
        receiver.stop();
    }
}
