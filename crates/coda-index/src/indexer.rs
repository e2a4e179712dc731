//! Workspace file indexer.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::WalkDir;

use coda_store::{ChunkRecord, FileRecord, Store, SymbolRecord};
use coda_vector::{Distance, Filter, Point, SharedEmbedder, SharedVectorStore};

use crate::chunker::{AstChunker, detect_language};
use crate::content_hash;
use crate::error::{IndexError, Result};

/// Extensions worth indexing.
const INDEXABLE_EXTENSIONS: &[&str] = &[
    // Code
    "py", "js", "ts", "jsx", "tsx", "java", "c", "cpp", "h", "hpp", "cs", "go", "rs", "rb", "php",
    "swift", "kt", "scala",
    // Markup / config
    "html", "css", "scss", "json", "yaml", "yml", "toml", "xml",
    // Docs
    "md", "txt", "rst",
];

/// Files above this size are skipped (10 MiB).
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Embedding batch size.
const EMBED_BATCH_SIZE: usize = 64;

/// Vector collection name for a workspace.
pub fn workspace_collection(workspace_id: &str) -> String {
    format!("rag_workspace_{}", workspace_id)
}

/// Outcome of indexing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// File was (re)indexed with this many chunks.
    Indexed {
        /// Chunks written.
        chunks: usize,
    },
    /// Content hash unchanged; nothing touched.
    Skipped,
}

/// Workspace indexing statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndexStats {
    /// Files discovered.
    pub total: usize,
    /// Files indexed.
    pub indexed: usize,
    /// Files skipped (unchanged hash).
    pub skipped: usize,
    /// Files that failed.
    pub failed: usize,
}

/// Indexes files of one workspace into `rag_workspace_<id>` and SQLite.
pub struct FileIndexer {
    workspace_id: String,
    module_id: String,
    workspace_path: PathBuf,
    embedder: SharedEmbedder,
    vector_store: SharedVectorStore,
    store: Store,
    chunker: AstChunker,
    gitignore: Option<Gitignore>,
    /// Serializes a single file's index cycle. The watcher and full scans
    /// both go through this.
    index_lock: tokio::sync::Mutex<()>,
}

impl FileIndexer {
    /// Create an indexer rooted at `workspace_path`.
    pub fn new(
        workspace_id: impl Into<String>,
        module_id: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
        embedder: SharedEmbedder,
        vector_store: SharedVectorStore,
        store: Store,
    ) -> Self {
        let workspace_path = workspace_path.into();
        let gitignore = load_gitignore(&workspace_path);
        Self {
            workspace_id: workspace_id.into(),
            module_id: module_id.into(),
            workspace_path,
            embedder,
            vector_store,
            store,
            chunker: AstChunker::new(),
            gitignore,
            index_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The workspace this indexer serves.
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// The workspace root.
    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    /// The collection this indexer writes.
    pub fn collection(&self) -> String {
        workspace_collection(&self.workspace_id)
    }

    /// Whether a relative path passes ignore rules, the extension set, and
    /// the size cap. Used for discovery and by the watcher's enqueue filter.
    pub fn is_path_indexable(&self, rel_path: &Path) -> bool {
        let Some(ext) = rel_path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        if !INDEXABLE_EXTENSIONS.contains(&ext) {
            return false;
        }
        if let Some(ref gitignore) = self.gitignore {
            if gitignore
                .matched_path_or_any_parents(rel_path, false)
                .is_ignore()
            {
                return false;
            }
        }
        true
    }

    /// Ensure the collection exists with the embedder's dimensionality.
    pub async fn ensure_collection(&self) -> Result<()> {
        self.vector_store
            .create_collection(&self.collection(), self.embedder.dimensions(), Distance::Cosine)
            .await?;
        Ok(())
    }

    /// Discover indexable files (relative paths).
    pub fn discover_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.workspace_path)
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
                    return true;
                }
                let Ok(rel) = entry.path().strip_prefix(&self.workspace_path) else {
                    return false;
                };
                if rel.as_os_str().is_empty() {
                    return true;
                }
                match self.gitignore {
                    Some(ref gitignore) => !gitignore
                        .matched_path_or_any_parents(rel, true)
                        .is_ignore(),
                    None => true,
                }
            });

        for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.workspace_path) else {
                continue;
            };
            if !self.is_path_indexable(rel) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) if meta.len() > MAX_FILE_SIZE => {
                    tracing::warn!(file = %rel.display(), size = meta.len(), "File too large, skipping");
                    continue;
                }
                Err(_) => continue,
                _ => {}
            }
            files.push(rel.to_path_buf());
        }

        tracing::info!(workspace_id = %self.workspace_id, count = files.len(), "Files discovered");
        files
    }

    /// Index the whole workspace.
    pub async fn index_workspace(&self) -> Result<IndexStats> {
        tracing::info!(workspace_id = %self.workspace_id, "Workspace indexing started");
        self.ensure_collection().await?;

        let files = self.discover_files();
        let mut stats = IndexStats {
            total: files.len(),
            ..Default::default()
        };

        for rel_path in files {
            match self.index_file(&rel_path).await {
                Ok(IndexOutcome::Indexed { .. }) => stats.indexed += 1,
                Ok(IndexOutcome::Skipped) => stats.skipped += 1,
                Err(e) => {
                    tracing::error!(file = %rel_path.display(), error = %e, "Indexing failed");
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            workspace_id = %self.workspace_id,
            total = stats.total,
            indexed = stats.indexed,
            skipped = stats.skipped,
            failed = stats.failed,
            "Workspace indexing complete"
        );
        Ok(stats)
    }

    /// Index one file. Unchanged content (by hash) is skipped; otherwise
    /// prior vectors for the path are removed before new chunks are
    /// embedded (through the cache) and persisted.
    pub async fn index_file(&self, rel_path: &Path) -> Result<IndexOutcome> {
        let _guard = self.index_lock.lock().await;
        self.index_file_locked(rel_path).await
    }

    async fn index_file_locked(&self, rel_path: &Path) -> Result<IndexOutcome> {
        let rel_str = rel_path.to_string_lossy().to_string();
        let abs_path = self.workspace_path.join(rel_path);

        let bytes = tokio::fs::read(&abs_path).await?;
        let content = String::from_utf8_lossy(&bytes).to_string();
        let hash = content_hash(&content);

        if self.store.file_hash(&self.workspace_id, &rel_str)? == Some(hash.clone()) {
            tracing::debug!(file = %rel_str, "Unchanged, skipping");
            return Ok(IndexOutcome::Skipped);
        }

        // Changed content: drop the path's previous points before re-embedding.
        let filter = Filter::new()
            .must("workspace_id", self.workspace_id.clone())
            .must("file_path", rel_str.clone());
        self.vector_store
            .delete_by_filter(&self.collection(), &filter)
            .await?;

        let language = detect_language(&rel_str);
        let result = self.chunker.chunk_file(&content, language);

        let vectors = self.embed_chunks(&result.chunks).await?;

        let mut points = Vec::with_capacity(result.chunks.len());
        let mut chunk_records = Vec::with_capacity(result.chunks.len());
        for (index, (chunk, vector)) in result.chunks.iter().zip(vectors).enumerate() {
            let vector_id = uuid::Uuid::new_v4().to_string();
            points.push(Point::new(
                vector_id.clone(),
                vector,
                serde_json::json!({
                    "workspace_id": self.workspace_id,
                    "module_id": self.module_id,
                    "file_path": rel_str,
                    "chunk_index": index,
                    "chunk_type": chunk.chunk_type,
                    "start_line": chunk.start_line,
                    "end_line": chunk.end_line,
                    "language": language,
                }),
            ));
            chunk_records.push(ChunkRecord {
                chunk_index: index,
                content: chunk.content.clone(),
                content_hash: content_hash(&chunk.content),
                chunk_type: chunk.chunk_type.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                start_offset: chunk.start_offset,
                end_offset: chunk.end_offset,
                vector_id,
                embedding_model: self.embedder.model_name().to_string(),
            });
        }

        if !points.is_empty() {
            self.vector_store.upsert(&self.collection(), points).await?;
        }

        let symbols: Vec<SymbolRecord> = result
            .symbols
            .iter()
            .map(|s| SymbolRecord {
                name: s.name.clone(),
                qualified_name: Some(s.qualified_name()),
                kind: s.kind.clone(),
                line: s.start_line,
                col: s.start_col,
                end_line: s.end_line,
                end_col: s.end_col,
                signature: s.signature.clone(),
                parent_qualname: s.parent_qualname.clone(),
                chunk_index: s.chunk_index,
            })
            .collect();

        let file = FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: self.workspace_id.clone(),
            path: rel_str.clone(),
            content_hash: hash,
            size: content.len(),
            line_count: content.lines().count(),
            status: "indexed".to_string(),
        };
        self.store.replace_file_index(&file, &chunk_records, &symbols)?;

        tracing::info!(file = %rel_str, chunks = chunk_records.len(), "File indexed");
        Ok(IndexOutcome::Indexed {
            chunks: chunk_records.len(),
        })
    }

    /// Remove a file's vectors and rows (watcher delete path).
    pub async fn delete_file(&self, rel_path: &Path) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let rel_str = rel_path.to_string_lossy().to_string();

        let filter = Filter::new()
            .must("workspace_id", self.workspace_id.clone())
            .must("file_path", rel_str.clone());
        self.vector_store
            .delete_by_filter(&self.collection(), &filter)
            .await?;
        self.store.delete_file_index(&self.workspace_id, &rel_str)?;

        tracing::info!(file = %rel_str, "File removed from index");
        Ok(())
    }

    /// Embed chunk contents, reusing cached vectors by content hash and
    /// batch-embedding the misses.
    async fn embed_chunks(&self, chunks: &[crate::chunker::Chunk]) -> Result<Vec<Vec<f32>>> {
        let model = self.embedder.model_name().to_string();
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        let mut missing: Vec<(usize, String, String)> = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            let hash = content_hash(&chunk.content);
            match self.store.cache_lookup(&hash, &model)? {
                Some(vector) => vectors[index] = Some(vector),
                None => missing.push((index, hash, chunk.content.clone())),
            }
        }

        for batch in missing.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(_, _, content)| content.clone()).collect();
            let embedded = self.embedder.embed(&texts).await?;
            for ((index, hash, _), vector) in batch.iter().zip(embedded) {
                self.store.cache_insert(hash, &model, &vector)?;
                vectors[*index] = Some(vector);
            }
        }

        Ok(vectors.into_iter().map(|v| v.unwrap_or_default()).collect())
    }
}

fn load_gitignore(workspace_path: &Path) -> Option<Gitignore> {
    let gitignore_path = workspace_path.join(".gitignore");
    if !gitignore_path.exists() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(workspace_path);
    if let Some(e) = builder.add(&gitignore_path) {
        tracing::warn!(error = %e, "Failed to load .gitignore");
        return None;
    }
    match builder.build() {
        Ok(gitignore) => {
            tracing::info!(path = %gitignore_path.display(), "Loaded .gitignore");
            Some(gitignore)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to build gitignore matcher");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coda_vector::{MemoryVectorStore, MockEmbedder, VectorStore};
    use std::sync::Arc;

    struct Fixture {
        dir: tempfile::TempDir,
        indexer: FileIndexer,
        embedder: Arc<MockEmbedder>,
        vector_store: Arc<MemoryVectorStore>,
        store: Store,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(MockEmbedder::new(16));
        let vector_store = Arc::new(MemoryVectorStore::new());
        let store = Store::open_in_memory().unwrap();
        let indexer = FileIndexer::new(
            "ws1",
            "vscode",
            dir.path(),
            embedder.clone() as SharedEmbedder,
            vector_store.clone() as SharedVectorStore,
            store.clone(),
        );
        Fixture {
            dir,
            indexer,
            embedder,
            vector_store,
            store,
        }
    }

    fn write(fixture: &Fixture, rel: &str, content: &str) {
        let path = fixture.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_index_workspace_end_to_end() {
        let fixture = fixture();
        write(&fixture, "main.py", "def main():\n    print(\"hi\")\n");
        write(&fixture, "notes.md", "# Notes\nsome text\n");
        write(&fixture, "binary.bin", "ignored");

        let stats = fixture.indexer.index_workspace().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.failed, 0);

        let info = fixture
            .vector_store
            .collection_info(&workspace_collection("ws1"))
            .await
            .unwrap();
        assert!(info.points_count >= 2);
    }

    #[tokio::test]
    async fn test_unchanged_hash_skips_and_keeps_points() {
        let fixture = fixture();
        write(&fixture, "a.py", "print(\"hi\")\n");
        fixture.indexer.index_workspace().await.unwrap();

        let before = fixture.vector_store.point_ids(&workspace_collection("ws1"));
        let outcome = fixture.indexer.index_file(Path::new("a.py")).await.unwrap();
        assert_eq!(outcome, IndexOutcome::Skipped);

        // No delete or upsert happened: identical point ids survive.
        let after = fixture.vector_store.point_ids(&workspace_collection("ws1"));
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_changed_file_replaces_points() {
        let fixture = fixture();
        write(&fixture, "a.py", "print(\"one\")\n");
        fixture.indexer.index_workspace().await.unwrap();
        let before = fixture.vector_store.point_ids(&workspace_collection("ws1"));

        write(&fixture, "a.py", "print(\"two\")\n");
        let outcome = fixture.indexer.index_file(Path::new("a.py")).await.unwrap();
        assert!(matches!(outcome, IndexOutcome::Indexed { .. }));

        let after = fixture.vector_store.point_ids(&workspace_collection("ws1"));
        assert!(before.iter().all(|id| !after.contains(id)));
    }

    #[tokio::test]
    async fn test_embedding_cache_reused_across_identical_files() {
        let fixture = fixture();
        write(&fixture, "a.py", "print(\"hi\")\n");
        write(&fixture, "b.py", "print(\"hi\")\n");

        fixture.indexer.index_workspace().await.unwrap();

        // Identical content embeds once; the second file hits the cache,
        // so the use counts sum to 2 (insert + reuse).
        assert_eq!(fixture.embedder.embedded_count(), 1);
        assert_eq!(fixture.store.cache_use_count_total().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_payload_carries_no_content() {
        let fixture = fixture();
        write(&fixture, "a.py", "print(\"hi\")\n");
        fixture.indexer.index_workspace().await.unwrap();

        let page = fixture
            .vector_store
            .scroll(&workspace_collection("ws1"), 10, None)
            .await
            .unwrap();
        for point in &page.points {
            assert!(point.payload.get("content").is_none());
            assert_eq!(point.payload["workspace_id"], "ws1");
            assert_eq!(point.payload["file_path"], "a.py");
        }
    }

    #[tokio::test]
    async fn test_gitignore_respected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "vendor/\n*.log\n").unwrap();
        std::fs::create_dir_all(dir.path().join("vendor")).unwrap();
        std::fs::write(dir.path().join("vendor/dep.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("keep.py"), "x = 1\n").unwrap();

        let indexer = FileIndexer::new(
            "ws1",
            "vscode",
            dir.path(),
            Arc::new(MockEmbedder::new(8)) as SharedEmbedder,
            Arc::new(MemoryVectorStore::new()) as SharedVectorStore,
            Store::open_in_memory().unwrap(),
        );

        let files = indexer.discover_files();
        assert_eq!(files, vec![PathBuf::from("keep.py")]);
    }

    #[tokio::test]
    async fn test_delete_file_removes_everything() {
        let fixture = fixture();
        write(&fixture, "a.py", "print(\"hi\")\n");
        fixture.indexer.index_workspace().await.unwrap();

        fixture.indexer.delete_file(Path::new("a.py")).await.unwrap();
        assert!(fixture.vector_store.point_ids(&workspace_collection("ws1")).is_empty());
        assert_eq!(fixture.store.file_hash("ws1", "a.py").unwrap(), None);
    }

    #[tokio::test]
    async fn test_ast_symbols_persisted() {
        let fixture = fixture();
        write(&fixture, "svc.py", "class Service:\n    def run(self):\n        pass\n");
        fixture.indexer.index_workspace().await.unwrap();

        let hits = fixture.store.search_symbols("ws1", "%service%", 10).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].kind, "class");
    }
}
