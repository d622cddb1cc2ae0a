//! Error types for the anchor layer.

use thiserror::Error;

use crate::path::PathError;

/// Errors reported by anchor and terminal operations.
///
/// Element constructors report their own failures through
/// [`AnchorError::Element`], so that callers of `Terminal::make` see the
/// verb's typed failure rather than a flattened message.
#[derive(Debug, Error)]
pub enum AnchorError {
    /// `make` was called on an anchor that already holds an element.
    #[error("anchor already has an element")]
    AlreadyOccupied,

    /// No factory is registered for the requested kind.
    #[error("element kind not known, kind={0}")]
    UnknownKind(String),

    /// A factory for this kind was registered twice.
    #[error("{0} element already registered")]
    AlreadyRegistered(String),

    /// The argument does not have the shape the kind expects.
    #[error("invalid argument to {kind} element: {message}")]
    InvalidArgument { kind: String, message: String },

    /// The kind exists but cannot be created through `make`.
    #[error("element factory not implemented for {0}")]
    NotConstructible(String),

    /// The target behind a remote reference is gone.
    #[error("remote target unavailable: {0}")]
    RemoteUnavailable(String),

    /// A remote reference does not point at the expected type.
    #[error("client/circuit type mismatch, kind={0}")]
    TypeMismatch(String),

    /// An anchor path could not be parsed.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Failure raised by an element implementation.
    #[error(transparent)]
    Element(Box<dyn std::error::Error + Send + Sync>),
}

impl AnchorError {
    /// Wrap an element-specific error.
    pub fn element<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        AnchorError::Element(Box::new(err))
    }

    /// Shorthand for [`AnchorError::InvalidArgument`].
    pub fn invalid_argument(kind: &str, message: impl Into<String>) -> Self {
        AnchorError::InvalidArgument {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    /// Returns the wrapped element error if it is of type `E`.
    pub fn downcast_element<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            AnchorError::Element(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Result type alias for anchor operations.
pub type Result<T> = std::result::Result<T, AnchorError>;
