//! The closed set of command codes the dongle protocol speaks, per the
//! external-interfaces table. A command code is a 16-bit value whose high
//! byte is one of [`TYPE_SYNC`]/[`TYPE_ASYNC`] and whose low byte is the
//! command id.

pub const TYPE_SYNC: u8 = 0x43;
pub const TYPE_ASYNC: u8 = 0x53;

pub const INQUIRY: u16 = 0x4327;
pub const GET_ENR: u16 = 0x4302;
pub const GET_MAC: u16 = 0x4304;
/// Unused by the mandatory handshake or any caller operation; kept for
/// parity with the reference client, which defines but never calls it.
pub const GET_KEY: u16 = 0x4306;

pub const FINISH_AUTH: u16 = 0x5314;
pub const GET_DONGLE_VERSION: u16 = 0x5316;
pub const NOTIFY_SENSOR_ALARM: u16 = 0x5319;
pub const ENABLE_SCAN: u16 = 0x531C;
pub const NOTIFY_SENSOR_SCAN: u16 = 0x5320;
pub const GET_SENSOR_R1: u16 = 0x5321;
pub const VERIFY_SENSOR: u16 = 0x5323;
pub const DEL_SENSOR: u16 = 0x5325;
pub const GET_SENSOR_COUNT: u16 = 0x532E;
pub const GET_SENSOR_LIST: u16 = 0x5330;
/// Reply code the dongle uses for each of the `count` MAC entries streamed
/// back from [`GET_SENSOR_LIST`].
pub const GET_SENSOR_LIST_REPLY: u16 = 0x5331;
pub const NOTIFY_SYNC_TIME: u16 = 0x5332;
/// Named literally rather than computed as `NOTIFY_SYNC_TIME + 1`, since the
/// reply-code-by-low-byte-increment convention used elsewhere is a coincidence
/// here, not the rule being followed.
pub const NOTIFY_SYNC_TIME_ACK: u16 = 0x5333;
pub const NOTIFY_EVENT_LOG: u16 = 0x5335;
pub const ASYNC_ACK: u16 = 0x53FF;

/// Sentinel handler-table key for the synthetic per-MAC event the session
/// controller synthesizes while draining a `GET_SENSOR_LIST` reply stream.
pub const SENSOR_FOUND: &str = "SENSOR_FOUND";

pub const fn is_async(cmd: u16) -> bool {
    (cmd >> 8) as u8 == TYPE_ASYNC
}

/// The command code every dongle reply to `cmd` is expected to carry: the
/// low byte incremented by one, type byte preserved.
pub const fn reply_code(cmd: u16) -> u16 {
    let ty = cmd & 0xFF00;
    let id = (cmd & 0x00FF) as u8;
    ty | (id.wrapping_add(1) as u16)
}

/// Human-readable name for logging; falls back to the raw hex code.
pub fn name(cmd: u16) -> &'static str {
    match cmd {
        INQUIRY => "INQUIRY",
        GET_ENR => "GET_ENR",
        GET_MAC => "GET_MAC",
        GET_KEY => "GET_KEY",
        FINISH_AUTH => "FINISH_AUTH",
        GET_DONGLE_VERSION => "GET_DONGLE_VERSION",
        NOTIFY_SENSOR_ALARM => "NOTIFY_SENSOR_ALARM",
        ENABLE_SCAN => "ENABLE_SCAN",
        NOTIFY_SENSOR_SCAN => "NOTIFY_SENSOR_SCAN",
        GET_SENSOR_R1 => "GET_SENSOR_R1",
        VERIFY_SENSOR => "VERIFY_SENSOR",
        DEL_SENSOR => "DEL_SENSOR",
        GET_SENSOR_COUNT => "GET_SENSOR_COUNT",
        GET_SENSOR_LIST => "GET_SENSOR_LIST",
        GET_SENSOR_LIST_REPLY => "GET_SENSOR_LIST_REPLY",
        NOTIFY_SYNC_TIME => "NOTIFY_SYNC_TIME",
        NOTIFY_SYNC_TIME_ACK => "NOTIFY_SYNC_TIME_ACK",
        NOTIFY_EVENT_LOG => "NOTIFY_EVENT_LOG",
        ASYNC_ACK => "ASYNC_ACK",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_code_increments_low_byte_preserving_type() {
        assert_eq!(reply_code(GET_MAC), 0x4305);
        assert_eq!(reply_code(GET_SENSOR_COUNT), 0x532F);
    }

    #[test]
    fn reply_code_wraps_at_0xff() {
        assert_eq!(reply_code(0x43FF), 0x4300);
    }

    #[test]
    fn is_async_checks_type_byte() {
        assert!(is_async(NOTIFY_SENSOR_ALARM));
        assert!(!is_async(GET_MAC));
    }
}
