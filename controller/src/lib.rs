//! A BLE link layer for advertising
//!
//! `trouble-controller` holds the upper link layer (ULL) of a BLE controller for extended, periodic
//! and isochronous broadcast advertising: it builds the advertising PDU chains handed to the radio,
//! places the auxiliary, periodic and BIG events on the ticker timeline and defers work between the
//! radio and the upper layer contexts.
//!
//! The crate is hardware-agnostic. The ticker and the radio-side consumer are collaborators,
//! reached through the [`ticker::Ticker`] trait and the prepare/done calls on [`link::LinkLayer`].

// We're `#[no_std]`, except when we're testing
#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod chain;
pub mod chan_sel;
pub mod codec;
pub mod config;
mod cursor;
mod error;
pub mod hdr;
pub mod link;
pub mod mayfly;
pub mod mock_ticker;
pub mod pdu;
pub mod pool;
pub mod sched;
pub mod ticker;
pub mod time;

pub use self::error::Error;
pub use self::sched::SchedError;
