//! WebAssembly elements for circuit anchors.
//!
//! A `wasm` element compiles a module with wasmtime and calls one exported
//! function on a blocking worker. The call can be interrupted by signal or
//! scrub through the engine's epoch deadline.

pub mod element;
pub mod error;
pub mod execute;
pub mod runner;

pub use element::{WasmElement, WasmFactory, YWasm};
pub use error::{Result, WasmError};
pub use execute::{Execute, WasmPhase, WasmStat, DEFAULT_FUNCTION};
pub use runner::WasmRun;
