//! Event surface (§4.7): translates raw `NOTIFY_SENSOR_ALARM` payloads into
//! structured events delivered to the caller's `on_event` callback.

use std::fmt;

/// Which physical sensor kind reported the event (offset 17 of the alarm
/// payload: `2` means motion, anything else means door).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Motion,
    Door,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SensorKind::Motion => "motion",
            SensorKind::Door => "door",
        })
    }
}

/// The logical state carried by a state event; door sensors report
/// open/closed, motion sensors report active/inactive, per §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Open,
    Closed,
    Active,
    Inactive,
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SensorState::Open => "open",
            SensorState::Closed => "closed",
            SensorState::Active => "active",
            SensorState::Inactive => "inactive",
        })
    }
}

/// A translated state change: `alarm_type == 162` with a meaningful `state`
/// bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEvent {
    pub mac: [u8; 8],
    pub timestamp_ms: u64,
    pub sensor_kind: SensorKind,
    pub state: SensorState,
    pub battery_percent: u8,
    pub signal: u8,
}

/// An alarm packet that isn't a recognized state change; surfaced verbatim
/// so callers that care about raw alarm traffic still see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAlarmEvent {
    pub mac: [u8; 8],
    pub timestamp_ms: u64,
    pub alarm_type: u8,
    pub sensor_kind: SensorKind,
    pub battery_percent: u8,
    pub signal: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEvent {
    State(StateEvent),
    RawAlarm(RawAlarmEvent),
}

impl SensorEvent {
    pub fn mac(&self) -> [u8; 8] {
        match self {
            SensorEvent::State(e) => e.mac,
            SensorEvent::RawAlarm(e) => e.mac,
        }
    }
}

const STATE_ALARM_TYPE: u8 = 162;

/// Parse a `NOTIFY_SENSOR_ALARM` payload per the §4.7 layout table. Returns
/// `None` only if the payload is short; a malformed-but-full-length payload
/// still parses (the fields are simply whatever garbage was there), since
/// this layer trusts the codec to have already validated frame integrity.
pub fn parse_alarm(payload: &[u8]) -> Option<SensorEvent> {
    if payload.len() < 26 {
        return None;
    }

    let timestamp_ms = u64::from_be_bytes(payload[0..8].try_into().unwrap());
    let alarm_type = payload[8];
    let mac: [u8; 8] = payload[9..17].try_into().unwrap();
    let sensor_kind = if payload[17] == 2 {
        SensorKind::Motion
    } else {
        SensorKind::Door
    };
    let battery_percent = payload[19];
    let state_byte = payload[22];
    let signal = payload[25];

    if alarm_type == STATE_ALARM_TYPE && (state_byte == 0 || state_byte == 1) {
        let state = match (sensor_kind, state_byte) {
            (SensorKind::Motion, 1) => SensorState::Active,
            (SensorKind::Motion, 0) => SensorState::Inactive,
            (SensorKind::Door, 1) => SensorState::Open,
            (SensorKind::Door, _) => SensorState::Closed,
        };
        Some(SensorEvent::State(StateEvent {
            mac,
            timestamp_ms,
            sensor_kind,
            state,
            battery_percent,
            signal,
        }))
    } else {
        Some(SensorEvent::RawAlarm(RawAlarmEvent {
            mac,
            timestamp_ms,
            alarm_type,
            sensor_kind,
            battery_percent,
            signal,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm_payload(alarm_type: u8, sensor_type: u8, state: u8, battery: u8, signal: u8) -> Vec<u8> {
        let mut p = vec![0u8; 26];
        p[0..8].copy_from_slice(&1_700_000_000_000u64.to_be_bytes());
        p[8] = alarm_type;
        p[9..17].copy_from_slice(&[0x77, 0x78, 0, 0, 0, 0, 0, 0x01]);
        p[17] = sensor_type;
        p[19] = battery;
        p[22] = state;
        p[25] = signal;
        p
    }

    #[test]
    fn state_event_for_door_open() {
        let payload = alarm_payload(162, 1, 1, 87, 42);
        match parse_alarm(&payload).unwrap() {
            SensorEvent::State(e) => {
                assert_eq!(e.sensor_kind, SensorKind::Door);
                assert_eq!(e.state, SensorState::Open);
                assert_eq!(e.battery_percent, 87);
                assert_eq!(e.signal, 42);
                assert_eq!(e.timestamp_ms, 1_700_000_000_000);
            }
            other => panic!("expected State, got {other:?}"),
        }
    }

    #[test]
    fn state_event_for_motion_inactive() {
        let payload = alarm_payload(162, 2, 0, 55, 10);
        match parse_alarm(&payload).unwrap() {
            SensorEvent::State(e) => {
                assert_eq!(e.sensor_kind, SensorKind::Motion);
                assert_eq!(e.state, SensorState::Inactive);
            }
            other => panic!("expected State, got {other:?}"),
        }
    }

    #[test]
    fn non_state_alarm_type_is_raw() {
        let payload = alarm_payload(5, 1, 1, 87, 42);
        assert!(matches!(parse_alarm(&payload).unwrap(), SensorEvent::RawAlarm(_)));
    }

    #[test]
    fn state_alarm_with_unmeaningful_state_byte_is_raw() {
        let payload = alarm_payload(162, 1, 7, 87, 42);
        assert!(matches!(parse_alarm(&payload).unwrap(), SensorEvent::RawAlarm(_)));
    }

    #[test]
    fn short_payload_returns_none() {
        assert!(parse_alarm(&[0u8; 10]).is_none());
    }
}
