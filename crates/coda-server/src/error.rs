//! Error types for the server crate.

use thiserror::Error;

/// Result type alias using the server error type.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors raised while assembling or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listen address.
    #[error("failed to bind {0}: {1}")]
    Bind(String, String),

    /// The HTTP server terminated with an error.
    #[error("server error: {0}")]
    Serve(String),

    /// Relational store failure during startup.
    #[error(transparent)]
    Store(#[from] coda_store::StoreError),

    /// Vector store failure during startup.
    #[error(transparent)]
    Vector(#[from] coda_vector::VectorError),
}
