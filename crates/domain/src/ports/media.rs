use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MediaError {
    #[error("media object not found: {0}")]
    NotFound(String),
    #[error("media storage unavailable: {0}")]
    Unavailable(String),
    #[error("media operation failed: {0}")]
    Operation(String),
}

/// Blob storage holding uploaded images.
pub trait MediaStorage: Send + Sync {
    fn name(&self) -> &'static str;
    fn delete(&self, object_key: &str) -> BoxFuture<'_, Result<(), MediaError>>;
}
