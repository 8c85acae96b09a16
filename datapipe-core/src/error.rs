//! Error types for pipe construction, dispatch, iteration and serialization

use thiserror::Error;

/// Result type for pipe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pipe operations
#[derive(Error, Debug)]
pub enum Error {
    /// A name was registered twice in the same table
    #[error("Unable to register '{0}' as the name is already taken")]
    DuplicateRegistration(String),

    /// Operation is neither native nor registered for this pipe variant
    #[error("'{type_name}' object has no attribute '{attribute}'")]
    AttributeNotFound {
        /// Concrete type of the receiver
        type_name: String,
        /// Requested attribute
        attribute: String,
    },

    /// A newer iterator was requested from the same pipe instance
    #[error(
        "This iterator has been invalidated because another iterator has been created \
         from the same pipe: {0}"
    )]
    IteratorInvalidated(String),

    /// Length requested on a pipe that has no well-defined size
    #[error("{0} instance doesn't have valid length")]
    UndefinedLength(String),

    /// Every engine of the serialization chain failed
    #[error("Serialization failed with engine '{engine}': {source}")]
    SerializationFailure {
        /// Engine whose failure is reported
        engine: String,
        /// Original cause
        source: Box<Error>,
    },

    /// A variant-wide hook is already active
    #[error("Attempt to override existing {0} hook")]
    HookAlreadyInstalled(&'static str),

    /// A stage or callable cannot be captured by the engine in use
    #[error("Cannot serialize {0}")]
    Unserializable(String),

    /// Binary encoding error
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Data type mismatch
    #[error("Data type mismatch: {0}")]
    TypeMismatch(String),

    /// Key absent from a keyed pipe
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Transformation error raised by user code
    #[error("Transformation error: {0}")]
    TransformationError(String),
}
