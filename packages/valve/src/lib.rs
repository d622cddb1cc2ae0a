//! Rendezvous channels for circuit anchors.
//!
//! The [`Valve`] matches senders with receivers and hands each pair a live
//! byte pipe. [`Chan`] is the valve as an anchor element of kind `chan`.

pub mod chan;
pub mod valve;

pub use chan::{Chan, ChanFactory, YValve};
pub use valve::{MessageReader, MessageWriter, Result, Stat, Valve, ValveError, MESSAGE_CAP};
