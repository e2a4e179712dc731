//! The vector store abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

/// Distance metric for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    /// Cosine similarity. Scores in [0, 1] for normalized vectors.
    Cosine,
    /// Euclidean distance.
    Euclid,
    /// Dot product.
    Dot,
}

impl Distance {
    /// Qdrant's spelling of the metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
            Distance::Euclid => "Euclid",
            Distance::Dot => "Dot",
        }
    }
}

/// A point: id, vector, and JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    /// Point id. UUIDs for chunk points, bullet ids for playbook points.
    pub id: String,
    /// The embedding vector.
    pub vector: Vec<f32>,
    /// Arbitrary JSON payload.
    pub payload: serde_json::Value,
}

impl Point {
    /// Create a point.
    pub fn new(id: impl Into<String>, vector: Vec<f32>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            vector,
            payload,
        }
    }
}

/// A k-NN search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Point id.
    pub id: String,
    /// Similarity score.
    pub score: f32,
    /// Point payload.
    pub payload: serde_json::Value,
}

/// One page of a scroll.
#[derive(Debug, Clone)]
pub struct ScrollPage {
    /// Points in this page.
    pub points: Vec<Point>,
    /// Offset for the next page; `None` when exhausted.
    pub next_offset: Option<serde_json::Value>,
}

/// Collection metadata.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Vector dimensionality.
    pub vector_size: usize,
    /// Distance metric.
    pub distance: Distance,
    /// Number of stored points.
    pub points_count: usize,
    /// Store-reported status string.
    pub status: String,
}

/// Exact-match payload filter: every condition must hold.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, serde_json::Value)>,
}

impl Filter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `payload[key] == value`.
    pub fn must(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    /// The filter's conditions.
    pub fn conditions(&self) -> &[(String, serde_json::Value)] {
        &self.conditions
    }

    /// Whether a payload satisfies every condition.
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| payload.get(key) == Some(value))
    }
}

/// Vector database operations used by the core.
///
/// Implementations serialize per-collection writes internally; callers add
/// their own coordination only where the data model demands it (the indexer
/// holds a per-workspace mutex across a file's index cycle).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection. Returns `false` (without error) if it exists.
    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<bool>;

    /// Drop a collection. Returns whether it existed.
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Insert or replace points by id.
    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()>;

    /// k-NN search. `score_threshold` is enforced by the store.
    async fn search(
        &self,
        name: &str,
        query: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>>;

    /// Paginated scroll over all points.
    async fn scroll(
        &self,
        name: &str,
        limit: usize,
        offset: Option<serde_json::Value>,
    ) -> Result<ScrollPage>;

    /// Delete points by id. Idempotent.
    async fn delete_points(&self, name: &str, ids: &[String]) -> Result<()>;

    /// Delete every point whose payload matches the filter.
    async fn delete_by_filter(&self, name: &str, filter: &Filter) -> Result<()>;

    /// Collection metadata.
    async fn collection_info(&self, name: &str) -> Result<CollectionInfo>;
}

/// A store shared across tasks.
pub type SharedVectorStore = Arc<dyn VectorStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        let filter = Filter::new()
            .must("workspace_id", "ws1")
            .must("file_path", "src/main.rs");
        let payload = serde_json::json!({
            "workspace_id": "ws1",
            "file_path": "src/main.rs",
            "chunk_index": 0,
        });
        assert!(filter.matches(&payload));

        let other = serde_json::json!({ "workspace_id": "ws1", "file_path": "src/lib.rs" });
        assert!(!filter.matches(&other));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::new().matches(&serde_json::json!({"anything": 1})));
    }
}
