use thiserror::Error;

use crate::ports::media::MediaError;
use crate::ports::store::StoreError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("conflict")]
    Conflict,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => DomainError::NotFound(path),
            StoreError::Conflict(_) => DomainError::Conflict,
            other => DomainError::Internal(other.to_string()),
        }
    }
}

impl From<MediaError> for DomainError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::NotFound(key) => DomainError::NotFound(key),
            other => DomainError::Internal(other.to_string()),
        }
    }
}
