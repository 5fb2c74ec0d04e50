use thiserror::Error;

/// Errors surfaced by the embedder-facing API (`spec.md` §7).
#[derive(Debug, Error)]
pub enum OcreError {
    /// An argument or core-state precondition was violated.
    #[error("invalid argument or state: {0}")]
    Invalid(&'static str),

    /// The core has not been initialized (or has already been shut down).
    #[error("core not initialized")]
    NotInitialized,

    /// A module, dispatcher, or export could not be located.
    #[error("not found: {0}")]
    NotFound(&'static str),

    /// An allocation failed, or the event queue has no space left.
    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),

    /// The guest runtime failed to create an execution environment, or a
    /// dispatch invocation exhausted its retries.
    #[error("guest runtime error: {0}")]
    RuntimeError(String),

    /// An internal write inconsistency (short write into the event ring, etc).
    #[error("internal I/O inconsistency: {0}")]
    Io(&'static str),
}

pub type Result<T> = std::result::Result<T, OcreError>;
