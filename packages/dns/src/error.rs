use thiserror::Error;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("invalid record {record:?}: {message}")]
    InvalidRecord { record: String, message: String },

    #[error("record type not supported: {0}")]
    UnsupportedType(String),

    #[error("invalid domain name {0:?}")]
    InvalidName(String),

    #[error("nameserver is scrubbed")]
    Scrubbed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DnsError>;
