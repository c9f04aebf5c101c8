//! Session controller (§4.6): the mandatory startup handshake, the
//! `List`/`Scan`/`Delete` operations, and lifecycle management.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use wyzesense_protocol::{cmd, Packet, SENSOR_R1_CHALLENGE};
use wyzesense_transport::{
    CommandEngine, Dispatcher, HandlerTable, HidRawDevice, RawIo, Receiver, DEFAULT_TIMEOUT,
};

use crate::error::DongleError;
use crate::event::{parse_alarm, SensorEvent};

/// Little-endian repetition of `0x30303030` four times; every repeated byte
/// is `0x30` so the endianness named in §4.6 step 2 has no observable effect
/// on the actual bytes, but the constant is spelled out here rather than
/// inlined so the derivation stays traceable.
const ENR_CHALLENGE: [u8; 16] = [0x30; 16];

const SCAN_DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// `Handle` from §6: a reference-counted, cheaply-cloneable session. The
/// engine's public surface is entirely methods on this type.
pub type Handle = Arc<Session>;

/// Result of a successful pairing scan (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub mac: [u8; 8],
    pub sensor_type: u8,
    pub version: u8,
}

/// Callback signature for `Open`'s `on_event` parameter.
pub type OnEvent = dyn Fn(&Handle, SensorEvent) + Send + Sync;

/// Session state acquired during handshake, read-only afterward (§3).
struct HandshakeInfo {
    enr: [u8; 16],
    mac: [u8; 8],
    version: String,
}

/// A one-shot, broadcastable wait condition used for the pairing scan's
/// notification wait (distinct from `CommandEngine`'s internal signal, which
/// is private to that crate).
#[derive(Default)]
struct Waiter<T> {
    value: Mutex<Option<T>>,
    condvar: Condvar,
}

impl<T: Clone> Waiter<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fire(&self, value: T) {
        *self.value.lock() = Some(value);
        self.condvar.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Option<T> {
        let mut slot = self.value.lock();
        let deadline = Instant::now() + timeout;
        while slot.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            self.condvar.wait_for(&mut slot, remaining);
        }
        slot.clone()
    }
}

/// The live session: owns the transport, the shared handler table, the
/// command engine, and the receiver thread. Construct via [`open`].
pub struct Session {
    transport: Arc<dyn RawIo>,
    table: Arc<HandlerTable>,
    engine: Arc<CommandEngine>,
    receiver: Mutex<Option<Receiver>>,
    stopped: AtomicBool,
    info: OnceLock<HandshakeInfo>,
    on_event: Arc<OnEvent>,
}

/// Open the device, spawn the receiver, and run the mandatory handshake.
/// Fails (and the device is left closed) if any handshake step times out or
/// returns an unexpected shape.
pub fn open(
    device_path: impl AsRef<Path>,
    on_event: impl Fn(&Handle, SensorEvent) + Send + Sync + 'static,
) -> Result<Handle, DongleError> {
    let device = HidRawDevice::open(device_path)?;
    open_with_transport(Arc::new(device), on_event)
}

/// Same as [`open`], but takes an already-constructed transport instead of
/// opening a real hidraw device. The public entry point for the protocol
/// core's own test scenarios (§5.1) and for callers embedding an alternate
/// `RawIo`; not a redefinition of the `Open` contract in §6, which is always
/// reachable via `open`.
pub fn open_with_transport(
    transport: Arc<dyn RawIo>,
    on_event: impl Fn(&Handle, SensorEvent) + Send + Sync + 'static,
) -> Result<Handle, DongleError> {
    let table = Arc::new(HandlerTable::new());
    let engine = Arc::new(CommandEngine::new(transport.clone(), table.clone()));
    let on_event: Arc<OnEvent> = Arc::new(on_event);

    let session = Arc::new_cyclic(|weak: &Weak<Session>| {
        install_permanent_handlers(&table, weak.clone(), on_event.clone());
        Session {
            transport: transport.clone(),
            table: table.clone(),
            engine,
            receiver: Mutex::new(None),
            stopped: AtomicBool::new(false),
            info: OnceLock::new(),
            on_event,
        }
    });

    let dispatcher = Dispatcher::new(transport.clone(), table.clone());
    let session_for_fatal = session.clone();
    let receiver = Receiver::spawn(transport.clone(), dispatcher, move |err| {
        warn!(error = %err, "receiver hit a fatal transport error");
        session_for_fatal.stopped.store(true, Ordering::SeqCst);
    });
    *session.receiver.lock() = Some(receiver);

    if let Err(err) = handshake(&session) {
        // The receiver thread's `on_fatal` closure holds a strong `Arc<Session>`
        // for its entire lifetime, so dropping the local `session` here would
        // not actually tear it down — stop it explicitly so the thread (and
        // the real `hidraw` fd it owns) doesn't leak on every failed handshake.
        session.stop();
        return Err(err);
    }
    Ok(session)
}

fn handshake(session: &Arc<Session>) -> Result<(), DongleError> {
    let status = send_simple(session, cmd::INQUIRY, Vec::new(), "INQUIRY")?;
    if status.first().copied().unwrap_or(0) == 0 {
        return Err(DongleError::Handshake {
            step: "INQUIRY",
            reason: "status byte was zero".into(),
        });
    }

    let enr = send_simple(session, cmd::GET_ENR, ENR_CHALLENGE.to_vec(), "GET_ENR")?;
    let enr: [u8; 16] = enr.as_slice().try_into().map_err(|_| DongleError::Handshake {
        step: "GET_ENR",
        reason: "expected a 16-byte reply".into(),
    })?;

    let mac = send_simple(session, cmd::GET_MAC, Vec::new(), "GET_MAC")?;
    let mac: [u8; 8] = mac.as_slice().try_into().map_err(|_| DongleError::Handshake {
        step: "GET_MAC",
        reason: "expected an 8-byte reply".into(),
    })?;

    let version_bytes = send_simple(session, cmd::GET_DONGLE_VERSION, Vec::new(), "GET_DONGLE_VERSION")?;
    let version = String::from_utf8_lossy(&version_bytes).trim_end_matches('\0').to_string();

    send_simple(session, cmd::FINISH_AUTH, vec![0xFF], "FINISH_AUTH")?;

    let _ = session.info.set(HandshakeInfo { enr, mac, version });

    enumerate(session).map_err(|e| DongleError::Handshake {
        step: "GET_SENSOR_COUNT/GET_SENSOR_LIST",
        reason: e.to_string(),
    })?;

    info!(mac = %hex(&session.dongle_mac()), version = %session.dongle_version(), "handshake complete");
    Ok(())
}

fn send_simple(
    session: &Arc<Session>,
    command: u16,
    payload: Vec<u8>,
    op: &'static str,
) -> Result<Vec<u8>, DongleError> {
    let reply = session
        .engine
        .do_simple(Packet::new(command, payload), DEFAULT_TIMEOUT)
        .ok_or(DongleError::Timeout { op })?;
    reply
        .payload
        .as_bytes()
        .map(|b| b.to_vec())
        .ok_or(DongleError::ProtocolMismatch {
            op,
            reason: "reply carried an ack-form payload, not bytes".into(),
        })
}

fn enumerate(session: &Arc<Session>) -> Result<Vec<[u8; 8]>, DongleError> {
    let count_bytes = send_simple(session, cmd::GET_SENSOR_COUNT, Vec::new(), "GET_SENSOR_COUNT")?;
    let count = *count_bytes.first().ok_or(DongleError::ProtocolMismatch {
        op: "GET_SENSOR_COUNT",
        reason: "empty reply".into(),
    })?;

    if count == 0 {
        return Ok(Vec::new());
    }

    let collected: Arc<Mutex<Vec<[u8; 8]>>> = Arc::new(Mutex::new(Vec::new()));
    let sensor_found = session.table.sensor_found();
    let collected_for_handler = collected.clone();

    let fired = session.engine.do_command(
        Packet::new(cmd::GET_SENSOR_LIST, vec![count]),
        move |packet, fire| {
            if let Some(bytes) = packet.payload.as_bytes() {
                if let Ok(mac) = <[u8; 8]>::try_from(bytes) {
                    if let Some(cb) = &sensor_found {
                        cb(mac);
                    }
                    let mut list = collected_for_handler.lock();
                    list.push(mac);
                    if list.len() >= count as usize {
                        fire();
                    }
                }
            }
        },
        DEFAULT_TIMEOUT * count as u32,
    );

    if !fired {
        return Err(DongleError::Timeout {
            op: "GET_SENSOR_LIST",
        });
    }

    let macs = collected.lock().clone();
    if macs.len() != count as usize {
        return Err(DongleError::ProtocolMismatch {
            op: "GET_SENSOR_LIST",
            reason: format!("expected {count} MACs, got {}", macs.len()),
        });
    }
    Ok(macs)
}

fn install_permanent_handlers(table: &Arc<HandlerTable>, session: Weak<Session>, on_event: Arc<OnEvent>) {
    let sync_table = session.clone();
    table.install(
        cmd::NOTIFY_SYNC_TIME,
        Arc::new(move |_packet: Packet| {
            let Some(session) = sync_table.upgrade() else {
                return;
            };
            let now_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            let ack = Packet::new(cmd::NOTIFY_SYNC_TIME_ACK, now_ms.to_be_bytes().to_vec());
            if let Ok(wire) = wyzesense_protocol::encode(&ack) {
                if let Err(err) = session.transport.write_all(&wire) {
                    warn!(error = %err, "failed to reply to sync-time notification");
                }
            }
        }),
    );

    table.install(
        cmd::NOTIFY_EVENT_LOG,
        Arc::new(move |packet: Packet| {
            let Some(bytes) = packet.payload.as_bytes() else {
                return;
            };
            if bytes.len() < 9 {
                debug!("event-log notification too short to parse");
                return;
            }
            let timestamp_ms = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
            let msg_len = bytes[8] as usize;
            let message = bytes
                .get(9..9 + msg_len)
                .map(|m| String::from_utf8_lossy(m).into_owned())
                .unwrap_or_default();
            info!(timestamp_ms, message = %message, "dongle event log");
        }),
    );

    let alarm_session = session;
    table.install(
        cmd::NOTIFY_SENSOR_ALARM,
        Arc::new(move |packet: Packet| {
            let Some(session) = alarm_session.upgrade() else {
                return;
            };
            let Some(bytes) = packet.payload.as_bytes() else {
                return;
            };
            match parse_alarm(bytes) {
                Some(event) => (session.on_event)(&session, event),
                None => debug!("sensor-alarm payload too short to parse"),
            }
        }),
    );
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl Session {
    /// Install the callback offered each paired sensor's MAC under the
    /// `SENSOR_FOUND` sentinel (§4.4/§4.7) as it streams back from
    /// `GET_SENSOR_LIST` during `list()`/handshake enumeration. Replaces
    /// whatever was previously installed; pass nothing (call with a no-op
    /// closure) to stop receiving it.
    pub fn set_sensor_found_handler(
        self: &Arc<Self>,
        handler: impl Fn([u8; 8]) + Send + Sync + 'static,
    ) {
        self.table.install_sensor_found(Arc::new(handler));
    }

    /// Returns the paired sensor MACs currently known to the dongle.
    pub fn list(self: &Arc<Self>) -> Result<Vec<[u8; 8]>, DongleError> {
        self.ensure_running()?;
        enumerate(self)
    }

    /// Enable pairing mode, wait for a new sensor's scan notification, and
    /// run the fixed handshake (§4.6) the dongle expects before it accepts
    /// the sensor. Returns `None` (not an error) if nothing paired within
    /// `timeout`.
    pub fn scan(self: &Arc<Self>, timeout: Duration) -> Result<Option<ScanResult>, DongleError> {
        self.ensure_running()?;

        let waiter: Arc<Waiter<(([u8; 8], u8, u8))>> = Waiter::new();
        let waiter_for_handler = waiter.clone();
        let wrapper: wyzesense_transport::Handler = Arc::new(move |packet: Packet| {
            if let Some(bytes) = packet.payload.as_bytes() {
                if bytes.len() >= 11 {
                    let mac: [u8; 8] = bytes[1..9].try_into().unwrap();
                    waiter_for_handler.fire((mac, bytes[9], bytes[10]));
                }
            }
        });
        let prior = self.table.install(cmd::NOTIFY_SENSOR_SCAN, wrapper);

        self.write_fire_and_forget(cmd::ENABLE_SCAN, vec![0x01]);

        let found = waiter.wait(timeout);

        if let Some((mac, _, _)) = found {
            let mut r1_payload = mac.to_vec();
            r1_payload.extend_from_slice(SENSOR_R1_CHALLENGE);
            self.write_fire_and_forget(cmd::GET_SENSOR_R1, r1_payload);
        }

        self.write_fire_and_forget(cmd::ENABLE_SCAN, vec![0x00]);

        if let Some((mac, _, _)) = found {
            let mut verify_payload = mac.to_vec();
            verify_payload.extend_from_slice(&[0xFF, 0x04]);
            self.write_fire_and_forget(cmd::VERIFY_SENSOR, verify_payload);
        }

        self.table.restore(cmd::NOTIFY_SENSOR_SCAN, prior);

        Ok(found.map(|(mac, sensor_type, version)| ScanResult {
            mac,
            sensor_type,
            version,
        }))
    }

    /// Remove a paired sensor. Returns `false` (not an error) if the
    /// dongle's ack didn't match the requested MAC or wasn't `0xFF` — the
    /// session remains healthy either way (§7, protocol-mismatch).
    pub fn delete(self: &Arc<Self>, mac: [u8; 8]) -> Result<bool, DongleError> {
        self.ensure_running()?;
        let reply = self
            .engine
            .do_simple(Packet::new(cmd::DEL_SENSOR, mac.to_vec()), DEFAULT_TIMEOUT)
            .ok_or(DongleError::Timeout { op: "DEL_SENSOR" })?;

        let Some(bytes) = reply.payload.as_bytes() else {
            return Ok(false);
        };
        if bytes.len() != 9 {
            return Ok(false);
        }
        Ok(&bytes[0..8] == mac.as_slice() && bytes[8] == 0xFF)
    }

    /// Issue an arbitrary command and return whatever single reply arrives
    /// on its reply code, or time out. Operator tooling only (the `raw` CLI
    /// subcommand); no caller-surface operation in §6 needs this, since
    /// `list`/`scan`/`delete` already cover every defined command.
    pub fn send_raw(self: &Arc<Self>, command: u16, payload: Vec<u8>) -> Result<Vec<u8>, DongleError> {
        self.ensure_running()?;
        send_simple(self, command, payload, "raw")
    }

    /// Interrogate the dongle's key (§4.6, supplemental; not part of the
    /// mandatory handshake or invoked automatically).
    pub fn get_key(self: &Arc<Self>) -> Result<[u8; 16], DongleError> {
        self.ensure_running()?;
        let bytes = send_simple(self, cmd::GET_KEY, Vec::new(), "GET_KEY")?;
        bytes.as_slice().try_into().map_err(|_| DongleError::ProtocolMismatch {
            op: "GET_KEY",
            reason: "expected a 16-byte reply".into(),
        })
    }

    /// Tear down: stop the receiver and wake any in-flight command waits.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.engine.notify_stop();
        if let Some(mut receiver) = self.receiver.lock().take() {
            receiver.stop();
        }
    }

    pub fn dongle_mac(&self) -> [u8; 8] {
        self.info.get().map(|i| i.mac).unwrap_or([0; 8])
    }

    pub fn dongle_enr(&self) -> [u8; 16] {
        self.info.get().map(|i| i.enr).unwrap_or([0; 16])
    }

    pub fn dongle_version(&self) -> &str {
        self.info.get().map(|i| i.version.as_str()).unwrap_or("")
    }

    fn ensure_running(&self) -> Result<(), DongleError> {
        if self.stopped.load(Ordering::SeqCst) {
            Err(DongleError::SessionStopped)
        } else {
            Ok(())
        }
    }

    fn write_fire_and_forget(&self, command: u16, payload: Vec<u8>) {
        let packet = Packet::new(command, payload);
        match wyzesense_protocol::encode(&packet) {
            Ok(wire) => {
                if let Err(err) = self.transport.write_all(&wire) {
                    warn!(error = %err, cmd = cmd::name(command), "write failed");
                }
            }
            Err(err) => warn!(error = %err, "failed to encode outbound packet"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;
    use wyzesense_protocol::decode;
    use wyzesense_transport::FakeTransport;

    /// Canned reply payloads keyed by the request command code that should
    /// trigger them; each popped entry may contain more than one payload
    /// (e.g. `GET_SENSOR_LIST` answers with `count` separate reply packets).
    type Script = HashMap<u16, VecDeque<Vec<Vec<u8>>>>;

    /// Plays `script` against `fake`: watches for newly-written frames,
    /// decodes the request, and pushes back the next scripted reply(ies) on
    /// that command's reply code. Stands in for a real dongle in every
    /// scenario test below.
    fn spawn_responder(fake: Arc<FakeTransport>, mut script: Script) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let mut seen = 0usize;
            for _ in 0..2000 {
                let frames = fake.written_frames();
                while seen < frames.len() {
                    let frame = &frames[seen];
                    seen += 1;
                    let request_cmd = match decode(frame) {
                        wyzesense_protocol::DecodeOutcome::Packet { packet, .. } => packet.cmd,
                        _ => continue,
                    };
                    if let Some(queue) = script.get_mut(&request_cmd) {
                        if let Some(payloads) = queue.pop_front() {
                            let reply_cmd = cmd::reply_code(request_cmd);
                            for payload in payloads {
                                let wire = encode(&Packet::new(reply_cmd, payload)).unwrap();
                                fake.push_inbound(&wire);
                            }
                        }
                    }
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        })
    }

    fn handshake_script(sensor_count: u8, sensor_macs: Vec<[u8; 8]>) -> Script {
        let mut script = Script::new();
        script.insert(cmd::INQUIRY, VecDeque::from([vec![vec![0x01]]]));
        script.insert(cmd::GET_ENR, VecDeque::from([vec![vec![0x42; 16]]]));
        script.insert(
            cmd::GET_MAC,
            VecDeque::from([vec![vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11]]]),
        );
        script.insert(
            cmd::GET_DONGLE_VERSION,
            VecDeque::from([vec![b"V1.0".to_vec()]]),
        );
        script.insert(cmd::FINISH_AUTH, VecDeque::from([vec![vec![0x00]]]));
        script.insert(
            cmd::GET_SENSOR_COUNT,
            VecDeque::from([vec![vec![sensor_count]]]),
        );
        if sensor_count > 0 {
            script.insert(
                cmd::GET_SENSOR_LIST,
                VecDeque::from([sensor_macs.into_iter().map(|m| m.to_vec()).collect()]),
            );
        }
        script
    }

    fn open_fake(script: Script) -> (Handle, Arc<FakeTransport>) {
        let fake = Arc::new(FakeTransport::new());
        let transport: Arc<dyn RawIo> = fake.clone();
        let responder = spawn_responder(fake.clone(), script);
        let events: Arc<StdMutex<Vec<SensorEvent>>> = Arc::new(StdMutex::new(Vec::new()));
        let events_for_cb = events.clone();
        let handle = open_with_transport(transport, move |_handle, event| {
            events_for_cb.lock().unwrap().push(event);
        })
        .expect("handshake should succeed against a scripted fake");
        let _ = responder;
        (handle, fake)
    }

    /// §8 scenario 1: handshake happy path with zero paired sensors.
    #[test]
    fn handshake_happy_path_and_empty_list() {
        let (handle, _fake) = open_fake(handshake_script(0, Vec::new()));
        assert_eq!(handle.dongle_mac(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11]);
        assert_eq!(handle.dongle_version(), "V1.0");
        assert_eq!(handle.list().unwrap(), Vec::<[u8; 8]>::new());
    }

    /// §8 scenario 2: two paired sensors enumerate in order.
    #[test]
    fn enumerate_two_sensors() {
        let mac1 = [0x77, 0x78, 0, 0, 0, 0, 0, 0x01];
        let mac2 = [0x77, 0x78, 0, 0, 0, 0, 0, 0x02];
        let mut script = handshake_script(2, vec![mac1, mac2]);
        // `list()` re-queries live, so answer a second round identically.
        script
            .entry(cmd::GET_SENSOR_COUNT)
            .or_default()
            .push_back(vec![vec![2]]);
        script
            .entry(cmd::GET_SENSOR_LIST)
            .or_default()
            .push_back(vec![mac1.to_vec(), mac2.to_vec()]);

        let (handle, _fake) = open_fake(script);
        assert_eq!(handle.list().unwrap(), vec![mac1, mac2]);
    }

    /// §4.4/§4.7 `SENSOR_FOUND`: each MAC streamed back from
    /// `GET_SENSOR_LIST` is also offered to a caller-installed callback.
    #[test]
    fn sensor_found_callback_fires_per_mac_during_list() {
        let mac1 = [0x77, 0x78, 0, 0, 0, 0, 0, 0x01];
        let mac2 = [0x77, 0x78, 0, 0, 0, 0, 0, 0x02];
        let mut script = handshake_script(0, Vec::new());
        script
            .entry(cmd::GET_SENSOR_COUNT)
            .or_default()
            .push_back(vec![vec![2]]);
        script
            .entry(cmd::GET_SENSOR_LIST)
            .or_default()
            .push_back(vec![mac1.to_vec(), mac2.to_vec()]);

        let (handle, _fake) = open_fake(script);

        let found: Arc<StdMutex<Vec<[u8; 8]>>> = Arc::new(StdMutex::new(Vec::new()));
        let found_for_cb = found.clone();
        handle.set_sensor_found_handler(move |mac| found_for_cb.lock().unwrap().push(mac));

        assert_eq!(handle.list().unwrap(), vec![mac1, mac2]);
        assert_eq!(found.lock().unwrap().clone(), vec![mac1, mac2]);
    }

    /// §8 scenario 3: a state-change alarm is translated and ack'd before
    /// delivery to the caller.
    #[test]
    fn alarm_translation_and_ack_ordering() {
        let fake = Arc::new(FakeTransport::new());
        let transport: Arc<dyn RawIo> = fake.clone();
        let responder = spawn_responder(fake.clone(), handshake_script(0, Vec::new()));

        let events: Arc<StdMutex<Vec<SensorEvent>>> = Arc::new(StdMutex::new(Vec::new()));
        let events_for_cb = events.clone();
        let handle = open_with_transport(transport, move |_handle, event| {
            events_for_cb.lock().unwrap().push(event);
        })
        .unwrap();
        responder.join().unwrap();

        let frames_before = fake.written_frames().len();

        let mut payload = vec![0u8; 26];
        payload[0..8].copy_from_slice(&1_700_000_000_000u64.to_be_bytes());
        payload[8] = 162; // alarm_type
        payload[9..17].copy_from_slice(&[0x77, 0x78, 0, 0, 0, 0, 0, 0x01]);
        payload[17] = 1; // door
        payload[19] = 87; // battery
        payload[22] = 1; // state: open
        payload[25] = 42; // signal

        let wire = encode(&Packet::new(cmd::NOTIFY_SENSOR_ALARM, payload)).unwrap();
        fake.push_inbound(&wire);

        let deadline = Instant::now() + Duration::from_secs(2);
        while events.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let delivered = events.lock().unwrap().clone();
        assert_eq!(delivered.len(), 1);
        match &delivered[0] {
            SensorEvent::State(e) => {
                assert_eq!(e.mac, [0x77, 0x78, 0, 0, 0, 0, 0, 0x01]);
                assert_eq!(e.sensor_kind, crate::event::SensorKind::Door);
                assert_eq!(e.state, crate::event::SensorState::Open);
                assert_eq!(e.battery_percent, 87);
                assert_eq!(e.signal, 42);
            }
            other => panic!("expected State event, got {other:?}"),
        }

        assert!(fake.written_frames().len() > frames_before, "expected an ASYNC_ACK to be written");
        handle.stop();
    }

    /// §8 scenario 4: a `DEL_SENSOR` ack with a mismatched MAC fails softly.
    #[test]
    fn delete_mismatch_returns_false() {
        let requested = [0x77, 0x78, 0, 0, 0, 0, 0, 0x01];
        let mut script = handshake_script(0, Vec::new());
        let mut mismatched_reply = vec![0x77, 0x78, 0, 0, 0, 0, 0, 0x02];
        mismatched_reply.push(0xFF);
        script
            .entry(cmd::DEL_SENSOR)
            .or_default()
            .push_back(vec![mismatched_reply]);

        let (handle, _fake) = open_fake(script);
        assert_eq!(handle.delete(requested).unwrap(), false);
    }

    /// §8 scenario 6: `Scan` times out when no notification arrives, but
    /// still disables scan mode afterward.
    #[test]
    fn scan_timeout_still_disables_scan_mode() {
        let (handle, fake) = open_fake(handshake_script(0, Vec::new()));

        let result = handle.scan(Duration::from_millis(200)).unwrap();
        assert!(result.is_none());

        let frames = fake.written_frames();
        let enable_scan_payloads: Vec<u8> = frames
            .iter()
            .filter_map(|f| match decode(f) {
                wyzesense_protocol::DecodeOutcome::Packet { packet, .. }
                    if packet.cmd == cmd::ENABLE_SCAN =>
                {
                    packet.payload.as_bytes().and_then(|b| b.first().copied())
                }
                _ => None,
            })
            .collect();
        assert_eq!(enable_scan_payloads, vec![0x01, 0x00]);
    }
}
