//! Process elements for circuit anchors.
//!
//! A `proc` element owns one operating-system process. Its standard streams
//! are buffered pipes independent of exit timing, its exit status is
//! broadcast to every waiter, and scrubbing it detaches the anchor without
//! touching the process.

pub mod cmd;
pub mod element;
pub mod proc;
pub mod signal;

pub use cmd::{Cmd, Phase, ProcStat};
pub use element::{cmd_from_value, ProcElement, ProcFactory, YProc};
pub use proc::{Proc, ProcError, Result, STD_BUFFER};
pub use signal::{parse_signal, signal_name, SIGNALS};
