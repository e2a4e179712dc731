//! Error types for the store crate.

use thiserror::Error;

/// Result type alias using the store error type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced by the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A referenced row does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Row kind (session, workspace, …).
        kind: &'static str,
        /// The missing id.
        id: String,
    },

    /// A column held JSON that no longer parses.
    #[error("corrupt {column} JSON: {source}")]
    CorruptJson {
        /// The offending column.
        column: &'static str,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
}
