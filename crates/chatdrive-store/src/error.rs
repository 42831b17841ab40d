//! Tree store error types.

use thiserror::Error;

/// Tree store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity absent, or owned by someone else.
    #[error("not found: {0}")]
    NotFound(String),

    /// A sibling directory or file already owns the name.
    #[error("name already exists: {0}")]
    NameConflict(String),

    /// Structural rule violation (root mutation, cycles, bad names).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Share exists but is past its expiry.
    #[error("share expired: {0}")]
    Expired(String),

    /// Underlying persistence fault.
    #[error("storage failure: {0}")]
    StorageFailure(#[from] rusqlite::Error),

    /// Persisted data could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Create a NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a NameConflict error.
    pub fn name_conflict(name: impl Into<String>) -> Self {
        Self::NameConflict(name.into())
    }

    /// Create an InvalidOperation error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an Expired error.
    pub fn expired(token: impl Into<String>) -> Self {
        Self::Expired(token.into())
    }

    /// Create a Corrupt error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_name_conflict(&self) -> bool {
        matches!(self, Self::NameConflict(_))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::InvalidOperation(_))
    }
}

/// Tree store result type.
pub type StoreResult<T> = Result<T, StoreError>;
