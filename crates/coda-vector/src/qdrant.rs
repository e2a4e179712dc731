//! Qdrant vector store over its REST API.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::{Result, VectorError};
use crate::store::{
    CollectionInfo, Distance, Filter, Point, ScrollPage, SearchHit, VectorStore,
};

/// Timeout for vector store calls. These are local network hops.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Qdrant-backed [`VectorStore`].
pub struct QdrantStore {
    client: Client,
    base_url: String,
}

impl QdrantStore {
    /// Connect to a Qdrant server, e.g. `http://localhost:6333`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VectorError::Store(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.base_url, name)
    }

    fn wire_filter(filter: &Filter) -> serde_json::Value {
        let must: Vec<serde_json::Value> = filter
            .conditions()
            .iter()
            .map(|(key, value)| {
                serde_json::json!({ "key": key, "match": { "value": value } })
            })
            .collect();
        serde_json::json!({ "must": must })
    }

    async fn expect_ok(response: reqwest::Response, context: &str) -> Result<serde_json::Value> {
        let status = response.status();
        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return Err(VectorError::Decode(format!("{}: {}", context, e))),
        };
        if !status.is_success() {
            let message = body["status"]["error"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(VectorError::Store(format!(
                "{}: HTTP {}: {}",
                context, status, message
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<bool> {
        // Existence probe first so creation stays idempotent.
        let probe = self.client.get(self.collection_url(name)).send().await?;
        if probe.status().is_success() {
            tracing::debug!(collection = name, "Collection already exists");
            return Ok(false);
        }

        let body = serde_json::json!({
            "vectors": { "size": vector_size, "distance": distance.as_str() }
        });
        let response = self
            .client
            .put(self.collection_url(name))
            .json(&body)
            .send()
            .await?;
        Self::expect_ok(response, "create_collection").await?;

        tracing::info!(collection = name, vector_size, "Collection created");
        Ok(true)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        let response = self.client.delete(self.collection_url(name)).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        Self::expect_ok(response, "delete_collection").await?;
        tracing::info!(collection = name, "Collection deleted");
        Ok(true)
    }

    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            tracing::warn!(collection = name, "Upsert called with no points");
            return Ok(());
        }
        let count = points.len();
        let wire_points: Vec<serde_json::Value> = points
            .into_iter()
            .map(|p| serde_json::json!({ "id": p.id, "vector": p.vector, "payload": p.payload }))
            .collect();

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url(name)))
            .json(&serde_json::json!({ "points": wire_points }))
            .send()
            .await?;
        Self::expect_ok(response, "upsert").await?;

        tracing::debug!(collection = name, count, "Points upserted");
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
        let mut body = serde_json::json!({
            "vector": query,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = serde_json::json!(threshold);
        }
        if let Some(filter) = filter {
            body["filter"] = Self::wire_filter(filter);
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url(name)))
            .json(&body)
            .send()
            .await?;
        let body = Self::expect_ok(response, "search").await?;

        let hits = body["result"]
            .as_array()
            .ok_or_else(|| VectorError::Decode("search result is not an array".to_string()))?
            .iter()
            .map(|hit| SearchHit {
                id: point_id_to_string(&hit["id"]),
                score: hit["score"].as_f64().unwrap_or(0.0) as f32,
                payload: hit["payload"].clone(),
            })
            .collect();
        Ok(hits)
    }

    async fn scroll(
        &self,
        name: &str,
        limit: usize,
        offset: Option<serde_json::Value>,
    ) -> Result<ScrollPage> {
        let mut body = serde_json::json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        if let Some(offset) = offset {
            body["offset"] = offset;
        }

        let response = self
            .client
            .post(format!("{}/points/scroll", self.collection_url(name)))
            .json(&body)
            .send()
            .await?;
        let body = Self::expect_ok(response, "scroll").await?;

        let points = body["result"]["points"]
            .as_array()
            .ok_or_else(|| VectorError::Decode("scroll result has no points".to_string()))?
            .iter()
            .map(|p| Point {
                id: point_id_to_string(&p["id"]),
                vector: p["vector"]
                    .as_array()
                    .map(|v| v.iter().map(|x| x.as_f64().unwrap_or(0.0) as f32).collect())
                    .unwrap_or_default(),
                payload: p["payload"].clone(),
            })
            .collect();

        let next_offset = match &body["result"]["next_page_offset"] {
            serde_json::Value::Null => None,
            other => Some(other.clone()),
        };

        Ok(ScrollPage { points, next_offset })
    }

    async fn delete_points(&self, name: &str, ids: &[String]) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url(name)))
            .json(&serde_json::json!({ "points": ids }))
            .send()
            .await?;
        Self::expect_ok(response, "delete_points").await?;

        tracing::debug!(collection = name, count = ids.len(), "Points deleted");
        Ok(())
    }

    async fn delete_by_filter(&self, name: &str, filter: &Filter) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url(name)))
            .json(&serde_json::json!({ "filter": Self::wire_filter(filter) }))
            .send()
            .await?;
        Self::expect_ok(response, "delete_by_filter").await?;
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let response = self.client.get(self.collection_url(name)).send().await?;
        if response.status().as_u16() == 404 {
            return Err(VectorError::CollectionNotFound(name.to_string()));
        }
        let body = Self::expect_ok(response, "collection_info").await?;
        let result = &body["result"];

        let distance = match result["config"]["params"]["vectors"]["distance"].as_str() {
            Some("Euclid") => Distance::Euclid,
            Some("Dot") => Distance::Dot,
            _ => Distance::Cosine,
        };

        Ok(CollectionInfo {
            name: name.to_string(),
            vector_size: result["config"]["params"]["vectors"]["size"]
                .as_u64()
                .unwrap_or(0) as usize,
            distance,
            points_count: result["points_count"].as_u64().unwrap_or(0) as usize,
            status: result["status"].as_str().unwrap_or("unknown").to_string(),
        })
    }
}

/// Qdrant point ids are integers or UUID strings; normalize to string.
fn point_id_to_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
