//! File, chunk, symbol, and embedding-cache operations used by the indexer
//! and the retriever.

use rusqlite::{OptionalExtension, params};

use crate::error::Result;
use crate::records::{ChunkRecord, FileRecord, SymbolRecord, SymbolSearchRow};
use crate::{Store, blob_to_vector, new_id, now, vector_to_blob};

impl Store {
    /// The stored content hash for a file, if it has been indexed.
    pub fn file_hash(&self, workspace_id: &str, path: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let hash = conn
            .query_row(
                "SELECT content_hash FROM files WHERE workspace_id = ?1 AND path = ?2",
                params![workspace_id, path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Replace a file's record, chunks, and symbols in one transaction.
    ///
    /// Prior chunk and symbol rows for the path are removed first, keeping
    /// the one-live-chunk-per-(file, ordinal) invariant.
    pub fn replace_file_index(
        &self,
        file: &FileRecord,
        chunks: &[ChunkRecord],
        symbols: &[SymbolRecord],
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let timestamp = now();

        // Reuse the row id when the path was indexed before.
        let existing_id: Option<String> = tx
            .query_row(
                "SELECT id FROM files WHERE workspace_id = ?1 AND path = ?2",
                params![file.workspace_id, file.path],
                |row| row.get(0),
            )
            .optional()?;
        let file_id = existing_id.unwrap_or_else(|| file.id.clone());

        tx.execute("DELETE FROM chunks WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id])?;

        tx.execute(
            "INSERT INTO files (id, workspace_id, path, content_hash, size, line_count, status, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(workspace_id, path) DO UPDATE SET
                content_hash = excluded.content_hash,
                size = excluded.size,
                line_count = excluded.line_count,
                status = excluded.status,
                indexed_at = excluded.indexed_at",
            params![
                file_id,
                file.workspace_id,
                file.path,
                file.content_hash,
                file.size as i64,
                file.line_count as i64,
                file.status,
                timestamp,
            ],
        )?;

        let mut chunk_ids: Vec<String> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let chunk_id = new_id();
            tx.execute(
                "INSERT INTO chunks (id, workspace_id, file_id, chunk_index, content, content_hash,
                                     chunk_type, start_line, end_line, start_offset, end_offset,
                                     vector_id, embedding_model)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    chunk_id,
                    file.workspace_id,
                    file_id,
                    chunk.chunk_index as i64,
                    chunk.content,
                    chunk.content_hash,
                    chunk.chunk_type,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                    chunk.start_offset as i64,
                    chunk.end_offset as i64,
                    chunk.vector_id,
                    chunk.embedding_model,
                ],
            )?;
            chunk_ids.push(chunk_id);
        }

        for symbol in symbols {
            let chunk_id = symbol
                .chunk_index
                .and_then(|index| chunk_ids.get(index))
                .cloned();
            tx.execute(
                "INSERT INTO symbols (id, workspace_id, file_id, name, qualified_name, kind,
                                      line, col, end_line, end_col, signature, parent_qualname, chunk_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    new_id(),
                    file.workspace_id,
                    file_id,
                    symbol.name,
                    symbol.qualified_name,
                    symbol.kind,
                    symbol.line as i64,
                    symbol.col as i64,
                    symbol.end_line as i64,
                    symbol.end_col as i64,
                    symbol.signature,
                    symbol.parent_qualname,
                    chunk_id,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Remove a file and its chunks/symbols. Returns whether a row existed.
    pub fn delete_file_index(&self, workspace_id: &str, path: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let file_id: Option<String> = tx
            .query_row(
                "SELECT id FROM files WHERE workspace_id = ?1 AND path = ?2",
                params![workspace_id, path],
                |row| row.get(0),
            )
            .optional()?;

        let Some(file_id) = file_id else {
            return Ok(false);
        };

        tx.execute("DELETE FROM chunks WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM files WHERE id = ?1", params![file_id])?;
        tx.commit()?;
        Ok(true)
    }

    /// Vector ids of a file's live chunks.
    pub fn chunk_vector_ids(&self, workspace_id: &str, path: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT chunks.vector_id FROM chunks
             JOIN files ON files.id = chunks.file_id
             WHERE files.workspace_id = ?1 AND files.path = ?2
             ORDER BY chunks.chunk_index",
        )?;
        let ids = stmt
            .query_map(params![workspace_id, path], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Hydrate chunk content and file path by vector id.
    pub fn hydrate_chunks(&self, vector_ids: &[String]) -> Result<Vec<(String, String, String)>> {
        if vector_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; vector_ids.len()].join(", ");
        let sql = format!(
            "SELECT chunks.vector_id, chunks.content, files.path
             FROM chunks JOIN files ON files.id = chunks.file_id
             WHERE chunks.vector_id IN ({placeholders})"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(vector_ids.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// LIKE search over symbol names and qualified names.
    pub fn search_symbols(
        &self,
        workspace_id: &str,
        pattern: &str,
        limit: usize,
    ) -> Result<Vec<SymbolSearchRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT symbols.name, symbols.kind, symbols.signature,
                    symbols.line, symbols.end_line, files.path, chunks.content
             FROM symbols
             JOIN files ON files.id = symbols.file_id
             LEFT JOIN chunks ON chunks.id = symbols.chunk_id
             WHERE symbols.workspace_id = ?1
               AND (LOWER(symbols.name) LIKE ?2 OR LOWER(symbols.qualified_name) LIKE ?2)
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![workspace_id, pattern, limit as i64], |row| {
                Ok(SymbolSearchRow {
                    name: row.get(0)?,
                    kind: row.get(1)?,
                    signature: row.get(2)?,
                    line: row.get::<_, i64>(3)? as usize,
                    end_line: row.get::<_, i64>(4)? as usize,
                    file_path: row.get(5)?,
                    chunk_content: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// LIKE search over chunk content. Returns (content, path, start_line).
    pub fn search_chunks_like(
        &self,
        workspace_id: &str,
        pattern: &str,
        limit: usize,
    ) -> Result<Vec<(String, String, usize)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT chunks.content, files.path, chunks.start_line
             FROM chunks JOIN files ON files.id = chunks.file_id
             WHERE chunks.workspace_id = ?1 AND LOWER(chunks.content) LIKE ?2
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![workspace_id, pattern, limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get::<_, i64>(2)? as usize,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All chunk rows for a workspace. Used by regex text search.
    pub fn all_chunks(
        &self,
        workspace_id: &str,
        limit: usize,
    ) -> Result<Vec<(String, String, usize)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT chunks.content, files.path, chunks.start_line
             FROM chunks JOIN files ON files.id = chunks.file_id
             WHERE chunks.workspace_id = ?1
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![workspace_id, limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get::<_, i64>(2)? as usize,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Embedding cache
    // ─────────────────────────────────────────────────────────────────────

    /// Look up a cached vector by content hash, bumping its use count.
    pub fn cache_lookup(&self, content_hash: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.conn();
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM embedding_cache WHERE content_hash = ?1 AND model = ?2",
                params![content_hash, model],
                |row| row.get(0),
            )
            .optional()?;

        match blob {
            Some(blob) => {
                conn.execute(
                    "UPDATE embedding_cache SET use_count = use_count + 1 WHERE content_hash = ?1",
                    params![content_hash],
                )?;
                Ok(Some(blob_to_vector(&blob)))
            }
            None => Ok(None),
        }
    }

    /// Insert a vector into the cache. The insert counts as the first use.
    pub fn cache_insert(&self, content_hash: &str, model: &str, vector: &[f32]) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO embedding_cache
                (content_hash, model, vector, dimensions, use_count, created_at)
             VALUES (?1, ?2, ?3, ?4,
                COALESCE((SELECT use_count FROM embedding_cache WHERE content_hash = ?1), 0) + 1,
                ?5)",
            params![
                content_hash,
                model,
                vector_to_blob(vector),
                vector.len() as i64,
                now(),
            ],
        )?;
        Ok(())
    }

    /// Sum of all cache use counts. Observability and tests.
    pub fn cache_use_count_total(&self) -> Result<u64> {
        let total: i64 = self.conn().query_row(
            "SELECT COALESCE(SUM(use_count), 0) FROM embedding_cache",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }
}
