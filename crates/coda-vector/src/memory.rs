//! In-process vector store used by tests and embedded runs.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::{Result, VectorError};
use crate::store::{
    CollectionInfo, Distance, Filter, Point, ScrollPage, SearchHit, VectorStore,
};

struct Collection {
    vector_size: usize,
    distance: Distance,
    /// Insertion-ordered points; upsert replaces in place so scroll order
    /// stays stable.
    points: Vec<Point>,
}

/// An in-memory [`VectorStore`] with cosine scoring.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point ids currently stored in a collection, in scroll order.
    pub fn point_ids(&self, name: &str) -> Vec<String> {
        self.collections
            .read()
            .get(name)
            .map(|c| c.points.iter().map(|p| p.id.clone()).collect())
            .unwrap_or_default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<bool> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            tracing::debug!(collection = name, "Collection already exists");
            return Ok(false);
        }
        collections.insert(
            name.to_string(),
            Collection {
                vector_size,
                distance,
                points: Vec::new(),
            },
        );
        Ok(true)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.write().remove(name).is_some())
    }

    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            tracing::warn!(collection = name, "Upsert called with no points");
            return Ok(());
        }
        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| VectorError::CollectionNotFound(name.to_string()))?;
        for point in points {
            match collection.points.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point,
                None => collection.points.push(point),
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        query: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| VectorError::CollectionNotFound(name.to_string()))?;

        let mut hits: Vec<SearchHit> = collection
            .points
            .iter()
            .filter(|p| filter.is_none_or(|f| f.matches(&p.payload)))
            .map(|p| SearchHit {
                id: p.id.clone(),
                score: cosine(query, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|hit| score_threshold.is_none_or(|t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(
        &self,
        name: &str,
        limit: usize,
        offset: Option<serde_json::Value>,
    ) -> Result<ScrollPage> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| VectorError::CollectionNotFound(name.to_string()))?;

        let start = offset
            .as_ref()
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let end = (start + limit).min(collection.points.len());
        let points = collection.points[start.min(end)..end].to_vec();
        let next_offset = if end < collection.points.len() {
            Some(serde_json::json!(end))
        } else {
            None
        };
        Ok(ScrollPage { points, next_offset })
    }

    async fn delete_points(&self, name: &str, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| VectorError::CollectionNotFound(name.to_string()))?;
        collection.points.retain(|p| !ids.contains(&p.id));
        Ok(())
    }

    async fn delete_by_filter(&self, name: &str, filter: &Filter) -> Result<()> {
        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| VectorError::CollectionNotFound(name.to_string()))?;
        collection.points.retain(|p| !filter.matches(&p.payload));
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| VectorError::CollectionNotFound(name.to_string()))?;
        Ok(CollectionInfo {
            name: name.to_string(),
            vector_size: collection.vector_size,
            distance: collection.distance,
            points_count: collection.points.len(),
            status: "green".to_string(),
        })
    }
}
