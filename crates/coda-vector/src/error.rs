//! Error types for the vector crate.

use thiserror::Error;

/// Result type alias using the vector error type.
pub type Result<T> = std::result::Result<T, VectorError>;

/// Errors produced by vector stores and embedders.
#[derive(Debug, Error)]
pub enum VectorError {
    /// Transport-level failure reaching the store or embedding endpoint.
    #[error("network error: {0}")]
    Network(String),

    /// The store rejected an operation.
    #[error("vector store error: {0}")]
    Store(String),

    /// A named collection does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// A response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The embedding engine failed.
    #[error("embedding error: {0}")]
    Embedding(String),
}

impl From<reqwest::Error> for VectorError {
    fn from(e: reqwest::Error) -> Self {
        VectorError::Network(e.to_string())
    }
}
