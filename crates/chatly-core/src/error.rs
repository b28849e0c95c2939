use chatly_store::StoreError;
use thiserror::Error;

use crate::blob::BlobError;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Forbidden,
    Conflict,
    Unavailable,
}

/// Errors produced by the chat core.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Already friends")]
    AlreadyFriends,

    #[error("Friend request already pending")]
    RequestPending,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(#[from] StoreError),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::AlreadyFriends | CoreError::RequestPending | CoreError::Conflict(_) => {
                ErrorKind::Conflict
            }
            CoreError::Unavailable(StoreError::NotFound) => ErrorKind::NotFound,
            CoreError::Unavailable(StoreError::Invalid(_)) => ErrorKind::InvalidArgument,
            CoreError::Unavailable(e) if e.is_constraint_violation() => ErrorKind::Conflict,
            CoreError::Unavailable(_) => ErrorKind::Unavailable,
            CoreError::Blob(BlobError::InvalidPath(_) | BlobError::TooLarge { .. }) => {
                ErrorKind::InvalidArgument
            }
            CoreError::Blob(BlobError::NotFound(_)) => ErrorKind::NotFound,
            CoreError::Blob(_) => ErrorKind::Unavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_conflicts_share_a_kind() {
        assert_eq!(CoreError::AlreadyFriends.kind(), ErrorKind::Conflict);
        assert_eq!(CoreError::RequestPending.kind(), ErrorKind::Conflict);
        assert_eq!(
            CoreError::Unavailable(StoreError::NotFound).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CoreError::Unavailable(StoreError::Poisoned).kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(
            CoreError::Blob(BlobError::InvalidPath("../x".into())).kind(),
            ErrorKind::InvalidArgument
        );
    }
}
