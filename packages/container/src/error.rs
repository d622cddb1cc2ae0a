use circuit_anchor::AnchorError;
use circuit_proc::ProcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("{0} not enabled on this server")]
    ToolUnavailable(String),

    #[error("`{command}` failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("container client failed to start: {0}")]
    NotStarted(String),

    #[error("expecting exactly one inspect record, got {0}")]
    NotOneRecord(usize),

    #[error(transparent)]
    Proc(#[from] ProcError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ContainerError>;

impl From<ContainerError> for AnchorError {
    fn from(err: ContainerError) -> Self {
        AnchorError::element(err)
    }
}
