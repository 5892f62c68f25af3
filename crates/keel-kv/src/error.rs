//! Error types for distributed store access.

use thiserror::Error;

pub type KvResult<T> = Result<T, KvError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    #[error("key not found: {0}")]
    NotFound(String),

    /// `create` found a live key at the path.
    #[error("key already exists: {0}")]
    Exists(String),

    /// `refresh` found a value other than the expected one.
    #[error("value mismatch at {0}")]
    Mismatch(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl KvError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::NotFound(_))
    }
}
