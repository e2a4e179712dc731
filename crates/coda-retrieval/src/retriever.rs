//! The three retrievers: module knowledge, workspace hybrid, playbook
//! bullets.
//!
//! Retrieval never fails a caller: storage errors are logged and degrade
//! to empty result sets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use coda_index::{knowledge_collection, workspace_collection};
use coda_store::Store;
use coda_vector::{SearchHit, SharedEmbedder, SharedVectorStore};

/// Vector collection name for a module's playbook bullets.
pub fn ace_collection(module_id: &str) -> String {
    format!("ace_{}", module_id)
}

/// A single retrieval result.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// Similarity score in [0, 1], after re-ranking.
    pub score: f32,
    /// Retrieved content.
    pub content: String,
    /// Source identifier (file path, doc name, bullet id).
    pub source: String,
    /// Full payload plus search-specific fields.
    pub metadata: serde_json::Value,
}

static TERM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]{2,}").unwrap());

/// Identifier-like terms of a query, lowercased.
fn extract_query_terms(query: &str) -> Vec<String> {
    TERM_RE
        .find_iter(query)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn score_symbol_match(term: &str, name: &str) -> f32 {
    let name_lower = name.to_lowercase();
    if name_lower == term {
        0.95
    } else if name_lower.starts_with(term) {
        0.85
    } else if name_lower.contains(term) {
        0.70
    } else {
        0.50
    }
}

/// Fraction of query terms present in the text.
fn lexical_score(query: &str, text: &str) -> f32 {
    let query_terms: std::collections::HashSet<String> =
        extract_query_terms(query).into_iter().collect();
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms: std::collections::HashSet<String> =
        extract_query_terms(text).into_iter().collect();
    let overlap = query_terms.intersection(&text_terms).count();
    overlap as f32 / query_terms.len() as f32
}

/// Retrieves context from indexed knowledge, workspace code, and bullets.
pub struct Retriever {
    module_id: String,
    embedder: SharedEmbedder,
    vector_store: SharedVectorStore,
    store: Option<Store>,
    workspace_path: Option<PathBuf>,
    ripgrep: Option<PathBuf>,
}

impl Retriever {
    /// Create a retriever for a module. Without a relational store or
    /// workspace path, symbol and text search degrade gracefully.
    pub fn new(
        module_id: impl Into<String>,
        embedder: SharedEmbedder,
        vector_store: SharedVectorStore,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            embedder,
            vector_store,
            store: None,
            workspace_path: None,
            ripgrep: find_ripgrep(),
        }
    }

    /// Attach the relational store for hydration and symbol/text search.
    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the workspace path, enabling ripgrep text search.
    pub fn with_workspace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_path = Some(path.into());
        self
    }

    /// The module this retriever serves.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    // ─────────────────────────────────────────────────────────────────────
    // Knowledge retrieval
    // ─────────────────────────────────────────────────────────────────────

    /// Retrieve module knowledge (docs and training examples).
    pub async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f32,
    ) -> Vec<RetrievalResult> {
        if query.is_empty() {
            tracing::warn!("Empty retrieval query");
            return Vec::new();
        }

        let hits = match self
            .search_collection(&knowledge_collection(&self.module_id), query, limit, score_threshold)
            .await
        {
            Some(hits) => hits,
            None => return Vec::new(),
        };

        let mut results: Vec<RetrievalResult> = hits
            .into_iter()
            .map(|hit| RetrievalResult {
                score: hit.score,
                content: hit.payload["content"].as_str().unwrap_or_default().to_string(),
                source: hit.payload["source"].as_str().unwrap_or("unknown").to_string(),
                metadata: hit.payload,
            })
            .collect();
        self.rerank(&mut results, query);
        results
    }

    // ─────────────────────────────────────────────────────────────────────
    // Workspace retrieval
    // ─────────────────────────────────────────────────────────────────────

    /// Vector-only workspace retrieval, hydrating content from SQLite.
    pub async fn retrieve_workspace(
        &self,
        query: &str,
        workspace_id: &str,
        limit: usize,
        score_threshold: f32,
    ) -> Vec<RetrievalResult> {
        if query.is_empty() || workspace_id.is_empty() {
            return Vec::new();
        }

        let hits = match self
            .search_collection(&workspace_collection(workspace_id), query, limit, score_threshold)
            .await
        {
            Some(hits) => hits,
            None => return Vec::new(),
        };

        let mut hydrated: HashMap<String, (String, String)> = HashMap::new();
        if let Some(ref store) = self.store {
            let vector_ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
            match store.hydrate_chunks(&vector_ids) {
                Ok(rows) => {
                    for (vector_id, content, path) in rows {
                        hydrated.insert(vector_id, (content, path));
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Chunk hydration failed"),
            }
        }

        hits.into_iter()
            .map(|hit| {
                let (content, source) = match hydrated.get(&hit.id) {
                    Some((content, path)) => (content.clone(), path.clone()),
                    None => (
                        hit.payload["content"].as_str().unwrap_or_default().to_string(),
                        hit.payload["file_path"].as_str().unwrap_or("workspace").to_string(),
                    ),
                };
                RetrievalResult {
                    score: hit.score,
                    content,
                    source,
                    metadata: hit.payload,
                }
            })
            .collect()
    }

    /// Hybrid workspace retrieval: vector, symbol, and text search run in
    /// parallel, merge by location key, and re-rank.
    pub async fn retrieve_workspace_hybrid(
        &self,
        query: &str,
        workspace_id: &str,
        limit: usize,
        score_threshold: f32,
        use_regex: bool,
    ) -> Vec<RetrievalResult> {
        let (vector, symbols, text) = tokio::join!(
            self.retrieve_workspace(query, workspace_id, limit, score_threshold),
            self.search_symbols(query, workspace_id, limit),
            self.search_text(query, workspace_id, limit, use_regex),
        );

        let mut merged = merge_results([vector, symbols, text]);
        self.rerank(&mut merged, query);
        merged.truncate(limit);
        merged
    }

    async fn search_symbols(
        &self,
        query: &str,
        workspace_id: &str,
        limit: usize,
    ) -> Vec<RetrievalResult> {
        let Some(ref store) = self.store else {
            return Vec::new();
        };
        let terms = extract_query_terms(query);
        let mut results = Vec::new();

        for term in terms {
            let pattern = format!("%{}%", term);
            let rows = match store.search_symbols(workspace_id, &pattern, limit) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(error = %e, "Symbol search failed");
                    continue;
                }
            };
            for row in rows {
                let content = row
                    .chunk_content
                    .clone()
                    .or_else(|| row.signature.clone())
                    .unwrap_or_else(|| row.name.clone());
                results.push(RetrievalResult {
                    score: score_symbol_match(&term, &row.name),
                    content,
                    source: row.file_path.clone(),
                    metadata: serde_json::json!({
                        "source_type": "symbol",
                        "symbol_name": row.name,
                        "symbol_kind": row.kind,
                        "signature": row.signature,
                        "line": row.line,
                        "end_line": row.end_line,
                        "file_path": row.file_path,
                    }),
                });
            }
        }
        results
    }

    async fn search_text(
        &self,
        query: &str,
        workspace_id: &str,
        limit: usize,
        use_regex: bool,
    ) -> Vec<RetrievalResult> {
        if query.is_empty() {
            return Vec::new();
        }

        if let (Some(rg), Some(root)) = (&self.ripgrep, &self.workspace_path) {
            let hits = self.ripgrep_search(rg, root, query, limit, use_regex).await;
            if !hits.is_empty() {
                return hits;
            }
        }
        self.chunk_text_search(query, workspace_id, limit, use_regex)
    }

    async fn ripgrep_search(
        &self,
        rg: &Path,
        root: &Path,
        query: &str,
        limit: usize,
        use_regex: bool,
    ) -> Vec<RetrievalResult> {
        let mut command = tokio::process::Command::new(rg);
        command
            .arg("--vimgrep")
            .arg("--no-heading")
            .arg("--max-count")
            .arg(limit.to_string());
        if !use_regex {
            command.arg("-F");
        }
        command.arg(query).arg(root).current_dir(root);

        let output = match command.output().await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "ripgrep invocation failed");
                return Vec::new();
            }
        };
        // 0 = matches, 1 = no matches; anything else is a real failure.
        if !matches!(output.status.code(), Some(0) | Some(1)) {
            return Vec::new();
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut results = Vec::new();
        for line in stdout.lines().take(limit) {
            let mut parts = line.splitn(4, ':');
            let (Some(file), Some(line_no), Some(col), Some(text)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let rel = Path::new(file)
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| file.to_string());
            results.push(RetrievalResult {
                score: 0.55,
                content: text.trim().to_string(),
                source: rel.clone(),
                metadata: serde_json::json!({
                    "source_type": "text",
                    "file_path": rel,
                    "line": line_no.parse::<u64>().unwrap_or(0),
                    "column": col.parse::<u64>().unwrap_or(0),
                }),
            });
        }
        results
    }

    fn chunk_text_search(
        &self,
        query: &str,
        workspace_id: &str,
        limit: usize,
        use_regex: bool,
    ) -> Vec<RetrievalResult> {
        let Some(ref store) = self.store else {
            return Vec::new();
        };

        let regex = if use_regex {
            match Regex::new(&format!("(?i){}", query)) {
                Ok(regex) => Some(regex),
                Err(_) => return Vec::new(),
            }
        } else {
            None
        };

        let rows = if use_regex {
            store.all_chunks(workspace_id, limit * 5)
        } else {
            store.search_chunks_like(workspace_id, &format!("%{}%", query.to_lowercase()), limit)
        };
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Chunk text search failed");
                return Vec::new();
            }
        };

        let mut results = Vec::new();
        for (content, path, start_line) in rows {
            if let Some(ref regex) = regex {
                if !regex.is_match(&content) {
                    continue;
                }
            }
            let snippet = extract_snippet(&content, query, regex.as_ref());
            results.push(RetrievalResult {
                score: 0.5,
                content: snippet,
                source: path.clone(),
                metadata: serde_json::json!({
                    "source_type": "text",
                    "file_path": path,
                    "line": start_line,
                }),
            });
            if results.len() >= limit {
                break;
            }
        }
        results
    }

    // ─────────────────────────────────────────────────────────────────────
    // Playbook bullets
    // ─────────────────────────────────────────────────────────────────────

    /// Retrieve playbook bullets relevant to a query.
    pub async fn retrieve_ace_bullets(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f32,
    ) -> Vec<RetrievalResult> {
        if query.is_empty() {
            tracing::warn!("Empty bullet retrieval query");
            return Vec::new();
        }

        let hits = match self
            .search_collection(&ace_collection(&self.module_id), query, limit, score_threshold)
            .await
        {
            Some(hits) => hits,
            None => return Vec::new(),
        };

        hits.into_iter()
            .map(|hit| {
                // Older collections lack the full bullet payload.
                let bullet_id = hit.payload["bullet_id"]
                    .as_str()
                    .or_else(|| hit.payload["id"].as_str())
                    .unwrap_or(&hit.id)
                    .to_string();
                RetrievalResult {
                    score: hit.score,
                    content: hit.payload["content"].as_str().unwrap_or_default().to_string(),
                    source: format!("ace_bullet_{}", bullet_id),
                    metadata: hit.payload,
                }
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Shared plumbing
    // ─────────────────────────────────────────────────────────────────────

    async fn search_collection(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        score_threshold: f32,
    ) -> Option<Vec<SearchHit>> {
        let query_vector = match self.embedder.embed_query(query).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed");
                return None;
            }
        };
        match self
            .vector_store
            .search(collection, &query_vector, limit, Some(score_threshold), None)
            .await
        {
            Ok(hits) => Some(hits),
            Err(e) => {
                tracing::warn!(collection, error = %e, "Vector search failed");
                None
            }
        }
    }

    fn rerank(&self, results: &mut Vec<RetrievalResult>, query: &str) {
        for result in results.iter_mut() {
            let lexical = lexical_score(query, &result.content);
            if let Some(object) = result.metadata.as_object_mut() {
                object.insert("lexical_score".to_string(), serde_json::json!(lexical));
            }
            result.score = (result.score + 0.2 * lexical).min(1.0);
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Summary of the module's knowledge and bullet collections.
    pub async fn collection_stats(&self) -> serde_json::Value {
        let rag = self
            .vector_store
            .collection_info(&knowledge_collection(&self.module_id))
            .await
            .ok();
        let ace = self
            .vector_store
            .collection_info(&ace_collection(&self.module_id))
            .await
            .ok();

        serde_json::json!({
            "module_id": self.module_id,
            "rag_collection": knowledge_collection(&self.module_id),
            "rag_chunks": rag.as_ref().map(|i| i.points_count).unwrap_or(0),
            "rag_status": rag.as_ref().map(|i| i.status.clone()),
            "ace_collection": ace.as_ref().map(|_| ace_collection(&self.module_id)),
            "ace_bullets": ace.as_ref().map(|i| i.points_count).unwrap_or(0),
            "vector_size": rag.as_ref().map(|i| i.vector_size).unwrap_or(0),
        })
    }
}

/// Merge result sets, keeping the max-scoring hit per location key.
fn merge_results<const N: usize>(sets: [Vec<RetrievalResult>; N]) -> Vec<RetrievalResult> {
    type Key = (String, Option<u64>, Option<u64>);
    let mut merged: HashMap<Key, RetrievalResult> = HashMap::new();
    let mut order: Vec<Key> = Vec::new();

    for set in sets {
        for result in set {
            let key: Key = (
                result.metadata["file_path"]
                    .as_str()
                    .unwrap_or(&result.source)
                    .to_string(),
                result.metadata["chunk_index"].as_u64(),
                result.metadata["line"].as_u64(),
            );
            match merged.get(&key) {
                Some(existing) if existing.score >= result.score => {}
                _ => {
                    if !merged.contains_key(&key) {
                        order.push(key.clone());
                    }
                    merged.insert(key, result);
                }
            }
        }
    }

    order.into_iter().filter_map(|key| merged.remove(&key)).collect()
}

fn extract_snippet(content: &str, query: &str, regex: Option<&Regex>) -> String {
    if content.is_empty() {
        return String::new();
    }
    if let Some(regex) = regex {
        for line in content.lines() {
            if regex.is_match(line) {
                return line.trim().to_string();
            }
        }
    }
    let lower = query.to_lowercase();
    for line in content.lines() {
        if line.to_lowercase().contains(&lower) {
            return line.trim().to_string();
        }
    }
    content.lines().next().unwrap_or_default().trim().to_string()
}

/// Locate ripgrep on PATH.
fn find_ripgrep() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join("rg");
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use coda_vector::{Distance, Embedder, MemoryVectorStore, MockEmbedder, Point, VectorStore};
    use std::sync::Arc;

    #[test]
    fn test_extract_query_terms() {
        let terms = extract_query_terms("fix the parse_config fn in a.rs");
        assert!(terms.contains(&"parse_config".to_string()));
        assert!(terms.contains(&"the".to_string()));
        // Two-character tokens are dropped.
        assert!(!terms.contains(&"fn".to_string()));
    }

    #[test]
    fn test_symbol_match_scores() {
        assert_eq!(score_symbol_match("config", "config"), 0.95);
        assert_eq!(score_symbol_match("config", "config_loader"), 0.85);
        assert_eq!(score_symbol_match("config", "load_config"), 0.70);
        assert_eq!(score_symbol_match("config", "parse"), 0.50);
    }

    #[test]
    fn test_lexical_score() {
        assert_eq!(lexical_score("load config", "the config is loaded"), 0.5);
        assert_eq!(lexical_score("", "text"), 0.0);
    }

    #[test]
    fn test_merge_keeps_max_score_per_key() {
        let a = RetrievalResult {
            score: 0.6,
            content: "one".into(),
            source: "a.rs".into(),
            metadata: serde_json::json!({"file_path": "a.rs", "chunk_index": 0}),
        };
        let b = RetrievalResult {
            score: 0.9,
            content: "one better".into(),
            source: "a.rs".into(),
            metadata: serde_json::json!({"file_path": "a.rs", "chunk_index": 0}),
        };
        let c = RetrievalResult {
            score: 0.4,
            content: "other".into(),
            source: "b.rs".into(),
            metadata: serde_json::json!({"file_path": "b.rs", "chunk_index": 1}),
        };

        let merged = merge_results([vec![a], vec![b], vec![c]]);
        assert_eq!(merged.len(), 2);
        let top = merged.iter().find(|r| r.source == "a.rs").unwrap();
        assert_eq!(top.score, 0.9);
    }

    async fn seeded_retriever() -> Retriever {
        let embedder = Arc::new(MockEmbedder::new(16));
        let vector_store = Arc::new(MemoryVectorStore::new());
        vector_store
            .create_collection("rag_vscode", 16, Distance::Cosine)
            .await
            .unwrap();
        let vector = embedder
            .embed(&["how to write tests".to_string()])
            .await
            .unwrap()
            .remove(0);
        vector_store
            .upsert(
                "rag_vscode",
                vec![Point::new(
                    "k1",
                    vector,
                    serde_json::json!({
                        "content": "how to write tests",
                        "source": "guide.md",
                        "doc_type": "documentation",
                    }),
                )],
            )
            .await
            .unwrap();

        Retriever::new("vscode", embedder as SharedEmbedder, vector_store as SharedVectorStore)
    }

    #[tokio::test]
    async fn test_knowledge_retrieval_with_threshold() {
        let retriever = seeded_retriever().await;

        let hits = retriever.retrieve("how to write tests", 5, 0.9).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "guide.md");
        // Identical text scores ~1.0 even before the lexical bonus.
        assert!(hits[0].score > 0.99);

        let misses = retriever.retrieve("unrelated topic entirely", 5, 0.9).await;
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn test_missing_collection_degrades_to_empty() {
        let retriever = Retriever::new(
            "ghost",
            Arc::new(MockEmbedder::new(8)) as SharedEmbedder,
            Arc::new(MemoryVectorStore::new()) as SharedVectorStore,
        );
        assert!(retriever.retrieve("anything", 5, 0.5).await.is_empty());
        assert!(retriever.retrieve_ace_bullets("anything", 5, 0.5).await.is_empty());
    }

    #[tokio::test]
    async fn test_collection_stats() {
        let retriever = seeded_retriever().await;
        let stats = retriever.collection_stats().await;
        assert_eq!(stats["module_id"], "vscode");
        assert_eq!(stats["rag_collection"], "rag_vscode");
        assert_eq!(stats["rag_chunks"], 1);
        // No bullet collection yet.
        assert_eq!(stats["ace_bullets"], 0);
        assert!(stats["ace_collection"].is_null());
    }

    #[tokio::test]
    async fn test_ace_bullet_legacy_fallback() {
        let embedder = Arc::new(MockEmbedder::new(8));
        let vector_store = Arc::new(MemoryVectorStore::new());
        vector_store
            .create_collection("ace_vscode", 8, Distance::Cosine)
            .await
            .unwrap();
        let vector = embedder
            .embed(&["use caching".to_string()])
            .await
            .unwrap()
            .remove(0);
        // Legacy payload: no bullet_id/id fields at all.
        vector_store
            .upsert(
                "ace_vscode",
                vec![Point::new(
                    "str-cafe0123",
                    vector,
                    serde_json::json!({ "content": "use caching" }),
                )],
            )
            .await
            .unwrap();

        let retriever = Retriever::new(
            "vscode",
            embedder as SharedEmbedder,
            vector_store as SharedVectorStore,
        );
        let hits = retriever.retrieve_ace_bullets("use caching", 5, 0.5).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "ace_bullet_str-cafe0123");
    }
}
