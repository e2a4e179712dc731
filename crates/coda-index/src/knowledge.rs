//! Module knowledge indexer: documentation and training-example JSONL.
//!
//! Unlike workspace chunks, knowledge points carry their content in the
//! payload because no relational rows mirror them.

use std::path::Path;

use walkdir::WalkDir;

use coda_vector::{Distance, Point, SharedEmbedder, SharedVectorStore};

use crate::chunker::SlidingChunker;
use crate::error::Result;
use crate::indexer::IndexStats;

/// Documentation extensions worth indexing.
const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "json", "jsonl", "yaml", "yml"];

/// Vector collection name for a module's knowledge.
pub fn knowledge_collection(module_id: &str) -> String {
    format!("rag_{}", module_id)
}

/// Indexes per-module operational knowledge into `rag_<module>`.
pub struct KnowledgeIndexer {
    module_id: String,
    embedder: SharedEmbedder,
    vector_store: SharedVectorStore,
    chunker: SlidingChunker,
}

impl KnowledgeIndexer {
    /// Create an indexer for a module.
    pub fn new(
        module_id: impl Into<String>,
        embedder: SharedEmbedder,
        vector_store: SharedVectorStore,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            embedder,
            vector_store,
            chunker: SlidingChunker::default(),
        }
    }

    /// The collection this indexer writes.
    pub fn collection(&self) -> String {
        knowledge_collection(&self.module_id)
    }

    async fn ensure_collection(&self) -> Result<()> {
        self.vector_store
            .create_collection(&self.collection(), self.embedder.dimensions(), Distance::Cosine)
            .await?;
        Ok(())
    }

    /// Index a documentation directory. `.jsonl` files are treated as
    /// training examples, everything else is chunked as prose.
    pub async fn index_documentation(&self, docs_path: &Path) -> Result<IndexStats> {
        self.ensure_collection().await?;

        let mut stats = IndexStats::default();
        for entry in WalkDir::new(docs_path).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !DOC_EXTENSIONS.contains(&ext) {
                continue;
            }

            stats.total += 1;
            let outcome = if ext == "jsonl" {
                self.index_training_file(entry.path()).await
            } else {
                self.index_doc_file(entry.path()).await
            };
            match outcome {
                Ok(points) if points > 0 => stats.indexed += 1,
                Ok(_) => stats.skipped += 1,
                Err(e) => {
                    tracing::error!(file = %entry.path().display(), error = %e, "Knowledge indexing failed");
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            module_id = %self.module_id,
            total = stats.total,
            indexed = stats.indexed,
            failed = stats.failed,
            "Knowledge indexing complete"
        );
        Ok(stats)
    }

    async fn index_doc_file(&self, path: &Path) -> Result<usize> {
        let bytes = tokio::fs::read(path).await?;
        let content = String::from_utf8_lossy(&bytes);
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let chunks = self.chunker.chunk_file(&content);
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let points: Vec<Point> = chunks
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (chunk, vector))| {
                Point::new(
                    uuid::Uuid::new_v4().to_string(),
                    vector,
                    serde_json::json!({
                        "module_id": self.module_id,
                        "doc_type": "documentation",
                        "source": source,
                        "chunk_index": index,
                        "content": chunk.content,
                    }),
                )
            })
            .collect();

        let count = points.len();
        self.vector_store.upsert(&self.collection(), points).await?;
        Ok(count)
    }

    /// Index a training-example JSONL file. Each line holds
    /// `{"prompt": …, "completion": …}`; the prompt is embedded and the
    /// completion rides along in the payload.
    async fn index_training_file(&self, path: &Path) -> Result<usize> {
        let bytes = tokio::fs::read(path).await?;
        let content = String::from_utf8_lossy(&bytes);
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let mut prompts = Vec::new();
        let mut completions = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(example) = serde_json::from_str::<serde_json::Value>(line) else {
                tracing::warn!(file = %source, "Skipping malformed training line");
                continue;
            };
            let Some(prompt) = example.get("prompt").and_then(|p| p.as_str()) else {
                continue;
            };
            prompts.push(prompt.to_string());
            completions.push(
                example
                    .get("completion")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_string(),
            );
        }

        if prompts.is_empty() {
            return Ok(0);
        }

        let vectors = self.embedder.embed(&prompts).await?;
        let points: Vec<Point> = prompts
            .iter()
            .zip(completions)
            .zip(vectors)
            .enumerate()
            .map(|(index, ((prompt, completion), vector))| {
                Point::new(
                    uuid::Uuid::new_v4().to_string(),
                    vector,
                    serde_json::json!({
                        "module_id": self.module_id,
                        "doc_type": "training_example",
                        "source": source,
                        "chunk_index": index,
                        "content": prompt,
                        "completion": completion,
                    }),
                )
            })
            .collect();

        let count = points.len();
        self.vector_store.upsert(&self.collection(), points).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coda_vector::{MemoryVectorStore, MockEmbedder, VectorStore};
    use std::sync::Arc;

    fn indexer(store: Arc<MemoryVectorStore>) -> KnowledgeIndexer {
        KnowledgeIndexer::new(
            "vscode",
            Arc::new(MockEmbedder::new(8)) as SharedEmbedder,
            store as SharedVectorStore,
        )
    }

    #[tokio::test]
    async fn test_docs_carry_content_in_payload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("guide.md"), "# Guide\nUse the thing.\n").unwrap();
        std::fs::write(dir.path().join("skip.bin"), "nope").unwrap();

        let store = Arc::new(MemoryVectorStore::new());
        let stats = indexer(store.clone()).index_documentation(dir.path()).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.indexed, 1);

        let page = store.scroll("rag_vscode", 10, None).await.unwrap();
        assert!(!page.points.is_empty());
        assert_eq!(page.points[0].payload["doc_type"], "documentation");
        assert!(page.points[0].payload["content"].as_str().unwrap().contains("Guide"));
    }

    #[tokio::test]
    async fn test_training_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("train.jsonl"),
            "{\"prompt\": \"make a cube\", \"completion\": \"cube code\"}\nnot json\n{\"prompt\": \"make a sphere\", \"completion\": \"sphere code\"}\n",
        )
        .unwrap();

        let store = Arc::new(MemoryVectorStore::new());
        indexer(store.clone()).index_documentation(dir.path()).await.unwrap();

        let page = store.scroll("rag_vscode", 10, None).await.unwrap();
        assert_eq!(page.points.len(), 2);
        for point in &page.points {
            assert_eq!(point.payload["doc_type"], "training_example");
            assert!(point.payload["completion"].as_str().unwrap().contains("code"));
        }
    }
}
