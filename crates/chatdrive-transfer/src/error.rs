//! Transfer error types.

use std::io;

use chatdrive_store::StoreError;
use thiserror::Error;

/// Transfer engine error type.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The transfer was cancelled, a part failed, or a part ended early.
    #[error("transfer aborted: {0}")]
    Aborted(String),

    /// The remote blob store rejected or lost an object.
    #[error("remote blob store: {0}")]
    Remote(String),

    /// A single object exceeded the remote ceiling.
    #[error("blob too large: {size} bytes exceeds {max}")]
    TooLarge { size: u64, max: u64 },

    /// Metadata commit failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Create an Aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }

    /// Create a Remote error.
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

impl From<TransferError> for io::Error {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Io(e) => e,
            TransferError::Aborted(_) => io::Error::new(io::ErrorKind::Interrupted, err),
            TransferError::Store(StoreError::NotFound(_)) => {
                io::Error::new(io::ErrorKind::NotFound, err)
            }
            other => io::Error::other(other),
        }
    }
}

/// Transfer result type.
pub type TransferResult<T> = Result<T, TransferError>;
