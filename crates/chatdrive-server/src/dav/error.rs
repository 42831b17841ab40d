//! WebDAV error type and its HTTP status mapping.

use chatdrive_store::StoreError;
use chatdrive_transfer::TransferError;
use http::StatusCode;
use thiserror::Error;

use super::DavMethod;

#[derive(Debug, Error)]
pub enum DavError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transfer(TransferError),

    /// The parent collection of the target doesn't exist.
    #[error("parent collection missing: {0}")]
    MissingParent(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("range not satisfiable for {size} bytes")]
    RangeNotSatisfiable { size: u64 },
}

impl From<TransferError> for DavError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Store(e) => Self::Store(e),
            other => Self::Transfer(other),
        }
    }
}

impl DavError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Status code for this error in response to `method`.
    pub fn status(&self, method: DavMethod) -> StatusCode {
        match self {
            DavError::Store(e) => match e {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::NameConflict(_) => match method {
                    DavMethod::Mkcol => StatusCode::METHOD_NOT_ALLOWED,
                    DavMethod::Move => StatusCode::PRECONDITION_FAILED,
                    _ => StatusCode::CONFLICT,
                },
                StoreError::InvalidOperation(_) => StatusCode::FORBIDDEN,
                StoreError::Expired(_) => StatusCode::GONE,
                StoreError::StorageFailure(_) | StoreError::Corrupt(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            DavError::Transfer(TransferError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            DavError::Transfer(_) => StatusCode::BAD_GATEWAY,
            DavError::MissingParent(_) => StatusCode::CONFLICT,
            DavError::Unauthorized => StatusCode::UNAUTHORIZED,
            DavError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DavError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            DavError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }
}

pub type DavResult<T> = Result<T, DavError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_conflict_depends_on_method() {
        let err = DavError::from(StoreError::name_conflict("x"));
        assert_eq!(err.status(DavMethod::Mkcol), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(err.status(DavMethod::Move), StatusCode::PRECONDITION_FAILED);
        assert_eq!(err.status(DavMethod::Put), StatusCode::CONFLICT);
    }

    #[test]
    fn test_transfer_store_errors_unwrap() {
        let err = DavError::from(TransferError::Store(StoreError::not_found("dir")));
        assert_eq!(err.status(DavMethod::Put), StatusCode::NOT_FOUND);

        let err = DavError::from(TransferError::aborted("part 1 failed"));
        assert_eq!(err.status(DavMethod::Put), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_structural_errors() {
        let err = DavError::from(StoreError::invalid("root"));
        assert_eq!(err.status(DavMethod::Delete), StatusCode::FORBIDDEN);
        assert_eq!(
            DavError::MissingParent("/a".into()).status(DavMethod::Mkcol),
            StatusCode::CONFLICT
        );
    }
}
