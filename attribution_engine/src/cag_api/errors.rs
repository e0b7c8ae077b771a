use thiserror::Error;

use crate::traits::StoreError;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The caller handed us something unusable. Not retried; surfaced as a client error.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// The store is unavailable or misbehaving. Retryable by the caller with backoff.
    #[error("{0}")]
    StoreError(#[from] StoreError),
}
