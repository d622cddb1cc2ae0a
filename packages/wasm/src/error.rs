use circuit_anchor::AnchorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WasmError {
    #[error("module {path} failed to compile: {message}")]
    Compile { path: String, message: String },

    #[error("module exports no function named {0:?}")]
    NoSuchFunction(String),

    #[error("bad arguments for {function}: {message}")]
    BadArguments { function: String, message: String },

    #[error("aborted")]
    Aborted,

    #[error("module is not running")]
    NotRunning,

    #[error("signal name not recognized")]
    SignalNotRecognized,

    #[error("signal {0} cannot be delivered to a wasm module")]
    SignalNotSupported(String),

    #[error("wasm worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, WasmError>;

impl From<WasmError> for AnchorError {
    fn from(err: WasmError) -> Self {
        AnchorError::element(err)
    }
}
