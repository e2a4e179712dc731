//! Relational metadata store.
//!
//! SQLite holds everything that is not a vector: workspaces and their
//! policies, sessions and their message log (mirrored into an FTS index),
//! tool events, file/chunk/symbol records from the indexer, and the
//! embedding cache. Vector payloads deliberately exclude chunk content;
//! this store is the source of truth for it.

mod error;
mod index_ops;
mod records;
mod schema;
mod session_ops;
mod workspace_ops;

pub use error::{Result, StoreError};
pub use records::{
    ChunkRecord, FileRecord, MessageRecord, SessionRecord, SymbolRecord, SymbolSearchRow,
};

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

/// Handle to the SQLite database.
///
/// Cheap to clone; all clones share one connection behind a mutex. SQLite
/// operations are short and local, so a blocking mutex is appropriate even
/// from async contexts.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (and migrate) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::create_schema(&conn)?;
        tracing::info!(path = %path.as_ref().display(), "Store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// RFC 3339 timestamp for row columns.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Fresh row id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Encode an f32 vector as a little-endian blob.
pub(crate) fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a little-endian blob into an f32 vector.
pub(crate) fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        // Schema creation is idempotent against the same connection.
        schema::create_schema(&store.conn()).unwrap();
    }

    #[test]
    fn test_open_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coda.db");
        let store = Store::open(&path).unwrap();
        drop(store);
        // Reopen migrates in place.
        Store::open(&path).unwrap();
    }

    #[test]
    fn test_vector_blob_round_trip() {
        let vector = vec![0.25_f32, -1.5, 3.0];
        assert_eq!(blob_to_vector(&vector_to_blob(&vector)), vector);
    }
}
