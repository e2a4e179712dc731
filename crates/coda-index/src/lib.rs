//! Workspace and knowledge indexing.
//!
//! Files are discovered honoring ignore rules, chunked (AST-preferred with a
//! sliding-window fallback), embedded through a content-hash cache, and
//! persisted as vector-store points plus relational chunk/symbol rows. A
//! filesystem watcher keeps the index fresh with debounced incremental
//! updates.

mod chunker;
mod error;
mod indexer;
mod knowledge;
mod watcher;

pub use chunker::{AstChunker, Chunk, ChunkResult, SlidingChunker, SymbolInfo, detect_language};
pub use error::{IndexError, Result};
pub use indexer::{FileIndexer, IndexOutcome, IndexStats, workspace_collection};
pub use knowledge::{KnowledgeIndexer, knowledge_collection};
pub use watcher::{WatchAction, WorkspaceWatcher, collapse_events};

use sha2::{Digest, Sha256};

/// SHA-256 of text content, lowercase hex.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable() {
        let a = content_hash("print(\"hi\")\n");
        let b = content_hash("print(\"hi\")\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash("print(\"bye\")\n"));
    }
}
