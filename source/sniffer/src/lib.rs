//! # busybody
//!
//! A passive sniffer for a two-wire (clock + data) serial bus.
//!
//! busybody watches raw electrical edges and reconstructs the protocol's
//! symbolic structure: transaction boundaries, individual bits, the
//! direction bit of the address byte, and per-byte acknowledgment. It
//! never drives the lines.
//!
//! ## Wiring it up
//!
//! The core is hardware-agnostic. A platform provides three things:
//!
//! * an [`EdgeSampler`] over its two (externally pulled-up) input pins;
//! * two edge interrupts, armed *after* the pins are configured: the
//!   clock line's rising edge calls [`Sniffer::on_clock_rising`], any
//!   data line transition calls [`Sniffer::on_data_edge`];
//! * a drain loop on its own schedule, pulling tokens out with
//!   [`Sniffer::drain`] (or [`sink::drain_symbols`]) and handing them to
//!   a transport.
//!
//! The handlers never block, allocate, or loop without a bound, and the
//! ring between them and the drain needs no mutual exclusion: each shared
//! field has exactly one writer, and the one index both handlers touch is
//! claimed atomically.
//!
//! Decoded tokens travel as single-byte symbols (`S s 0 1 + - R W`, one
//! per token, bijective) defined in [`snoop-proto`](snoop_proto), which
//! host-side consumers share.

#![cfg_attr(not(test), no_std)]

pub mod decode;
pub mod ring;
pub mod sample;
pub mod sim;
pub mod sink;

pub use snoop_proto as proto;

pub use self::{
    decode::{BusState, Diagnostics, Drain, Sniffer, SnifferSettings, SnifferSettingsOverrides},
    ring::{RingFull, SlotStorage, TokenRing},
    sample::{EdgeSampler, Line},
};
pub use snoop_proto::Token;
