//! Error types for the indexing crate.

use thiserror::Error;

/// Result type alias using the index error type.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors produced by indexing and watching.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Relational store failure.
    #[error(transparent)]
    Store(#[from] coda_store::StoreError),

    /// Vector store or embedding failure.
    #[error(transparent)]
    Vector(#[from] coda_vector::VectorError),

    /// Filesystem watcher failure.
    #[error("watch error: {0}")]
    Watch(String),

    /// A path escaped the workspace root.
    #[error("path outside workspace: {0}")]
    OutsideWorkspace(String),
}

impl From<notify::Error> for IndexError {
    fn from(e: notify::Error) -> Self {
        IndexError::Watch(e.to_string())
    }
}
