//! Row structs shared with the indexer and retriever.

use serde::{Deserialize, Serialize};

/// One indexed file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Row id.
    pub id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Path relative to the workspace root.
    pub path: String,
    /// SHA-256 of the content, hex.
    pub content_hash: String,
    /// Content size in bytes.
    pub size: usize,
    /// Number of lines.
    pub line_count: usize,
    /// Index status (`indexed`).
    pub status: String,
}

/// One chunk row, mirroring a vector-store point.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Position of the chunk within its file.
    pub chunk_index: usize,
    /// Chunk content. The vector payload does not carry this.
    pub content: String,
    /// SHA-256 of the chunk content, hex.
    pub content_hash: String,
    /// Chunk kind (heuristic, function, class, …).
    pub chunk_type: String,
    /// Start line (0-based).
    pub start_line: usize,
    /// End line.
    pub end_line: usize,
    /// Byte offset of the chunk start.
    pub start_offset: usize,
    /// Byte offset of the chunk end.
    pub end_offset: usize,
    /// Id of the vector-store point carrying this chunk's embedding.
    pub vector_id: String,
    /// Embedding model the vector was produced with.
    pub embedding_model: String,
}

/// One extracted symbol row.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    /// Symbol name.
    pub name: String,
    /// Dotted qualified name, when nested.
    pub qualified_name: Option<String>,
    /// Symbol kind (function, class, method, interface, enum).
    pub kind: String,
    /// Start line (0-based).
    pub line: usize,
    /// Start column.
    pub col: usize,
    /// End line.
    pub end_line: usize,
    /// End column.
    pub end_col: usize,
    /// First-line signature.
    pub signature: Option<String>,
    /// Enclosing symbol's qualified name.
    pub parent_qualname: Option<String>,
    /// Index of the chunk this symbol was emitted with.
    pub chunk_index: Option<usize>,
}

/// A symbol search hit joined with its chunk content.
#[derive(Debug, Clone)]
pub struct SymbolSearchRow {
    /// Symbol name.
    pub name: String,
    /// Symbol kind.
    pub kind: String,
    /// First-line signature.
    pub signature: Option<String>,
    /// Start line.
    pub line: usize,
    /// End line.
    pub end_line: usize,
    /// File path relative to the workspace root.
    pub file_path: String,
    /// Content of the linked chunk, when one exists.
    pub chunk_content: Option<String>,
}

/// One session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id.
    pub id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Optional agent configuration id.
    pub agent_config_id: Option<String>,
    /// Model provider override.
    pub model_provider: Option<String>,
    /// Model name override.
    pub model_name: Option<String>,
    /// Model URL override.
    pub model_url: Option<String>,
    /// Context window override.
    pub context_window: Option<u32>,
    /// Temperature override.
    pub temperature: Option<f32>,
    /// Title, set from the first user message.
    pub title: Option<String>,
    /// Session status.
    pub status: String,
    /// Appended message count.
    pub message_count: u32,
}

/// One message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Row id.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Per-session sequence number, starting at 0.
    pub seq: u32,
    /// Author role.
    pub role: String,
    /// Message content.
    pub content: String,
    /// Context JSON attached to user messages.
    pub context: Option<serde_json::Value>,
    /// Metadata JSON attached to assistant messages.
    pub metadata: Option<serde_json::Value>,
}
