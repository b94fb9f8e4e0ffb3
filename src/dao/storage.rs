use std::error::Error;
use thiserror::Error;

/// Result alias for remote mirror operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by remote mirror backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("remote mirror unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("remote mirror rejected the request: {message}")]
    Rejected { message: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a rejection that has no underlying transport error.
    pub fn rejected(message: impl Into<String>) -> Self {
        StorageError::Rejected {
            message: message.into(),
        }
    }
}
