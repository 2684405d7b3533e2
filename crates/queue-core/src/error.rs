use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store could not be reached or rejected the statement.
    /// No job state was changed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("job not found")]
    NotFound,

    #[error("invalid job state")]
    InvalidState,

    #[error("configuration error: {0}")]
    Configuration(String),

    /// The external processor raised while handling a payload synchronously.
    #[error("processing failed: {0}")]
    Processing(String),

    #[error("internal error: {0}")]
    Internal(String),
}
