//! Error types for the ACE crate.

use thiserror::Error;

/// Result type alias using the ACE error type.
pub type Result<T> = std::result::Result<T, AceError>;

/// Errors produced by playbook persistence.
#[derive(Debug, Error)]
pub enum AceError {
    /// LLM failure during reflection or curation.
    #[error(transparent)]
    Llm(#[from] coda_llm::LlmError),

    /// Vector store or embedding failure.
    #[error(transparent)]
    Vector(#[from] coda_vector::VectorError),
}
