//! Protocol engine for the Wyze Sense USB HID bridge.
//!
//! This crate exposes the caller surface described in §6: [`session::open`]
//! performs the mandatory handshake and returns a [`session::Handle`] whose
//! `list`/`scan`/`delete` methods drive the remaining operations. The wire
//! codec and HID transport live one layer down, in `wyzesense-protocol` and
//! `wyzesense-transport` respectively; this crate wires them together into
//! the session controller and event surface (§4.6, §4.7).

pub mod error;
pub mod event;
pub mod session;

pub use error::DongleError;
pub use event::{RawAlarmEvent, SensorEvent, SensorKind, SensorState, StateEvent};
pub use session::{open, open_with_transport, Handle, ScanResult, Session};
