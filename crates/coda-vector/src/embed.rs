//! Text-to-vector embedding.
//!
//! Embeddings are L2-normalized on the way out so cosine similarity reduces
//! to a dot product in every store.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, VectorError};

/// Timeout for embedding calls.
const EMBED_TIMEOUT: Duration = Duration::from_secs(120);

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Text embedding engine.
///
/// `embed(&[])` returns an empty matrix, never an error. Empty strings embed
/// to the zero vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. Output has one normalized row per input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Ok(vec![0.0; self.dimensions()]);
        }
        let mut rows = self.embed(std::slice::from_ref(&text.to_string())).await?;
        rows.pop()
            .ok_or_else(|| VectorError::Embedding("embedder returned no rows".to_string()))
    }

    /// Embed a search query. Alias of [`embed_single`](Embedder::embed_single)
    /// for call-site clarity.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed_single(query).await
    }

    /// Output dimensionality.
    fn dimensions(&self) -> usize;

    /// Name of the embedding model, recorded alongside cached vectors.
    fn model_name(&self) -> &str;
}

/// An embedder shared across tasks.
pub type SharedEmbedder = Arc<dyn Embedder>;

// ─────────────────────────────────────────────────────────────────────────────
// Ollama Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Embedder backed by Ollama's `/api/embed` endpoint.
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    /// Create an embedder for a model served by Ollama.
    ///
    /// `dimensions` must match what the model produces (e.g. 768 for
    /// `nomic-embed-text`); it sizes collections before the first embed call.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(EMBED_TIMEOUT)
            .build()
            .map_err(|e| VectorError::Embedding(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&serde_json::json!({ "model": self.model, "input": texts }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(VectorError::Embedding(format!(
                "Ollama embed HTTP {}: {}",
                status, text
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Decode(format!("embed response: {}", e)))?;

        if body.embeddings.len() != texts.len() {
            return Err(VectorError::Embedding(format!(
                "embedder returned {} rows for {} inputs",
                body.embeddings.len(),
                texts.len()
            )));
        }

        let mut rows = body.embeddings;
        for row in rows.iter_mut() {
            l2_normalize(row);
        }
        Ok(rows)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(serde::Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic embedder for tests: the same text always produces the same
/// normalized vector, and distinct texts almost surely differ. Tracks how
/// many texts it has embedded so cache-reuse tests can count invocations.
pub struct MockEmbedder {
    dimensions: usize,
    embedded: parking_lot::Mutex<usize>,
}

impl MockEmbedder {
    /// Create a mock with the given dimensionality.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            embedded: parking_lot::Mutex::new(0),
        }
    }

    /// Total texts embedded so far.
    pub fn embedded_count(&self) -> usize {
        *self.embedded.lock()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if text.is_empty() {
            return vec![0.0; self.dimensions];
        }
        // FNV-1a seed, xorshift fill.
        let mut seed: u64 = 0xcbf29ce484222325;
        for byte in text.bytes() {
            seed ^= byte as u64;
            seed = seed.wrapping_mul(0x100000001b3);
        }
        let mut state = seed.max(1);
        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                ((state % 2000) as f32 / 1000.0) - 1.0
            })
            .collect();
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.embedded.lock() += texts.len();
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_input_returns_empty_matrix() {
        let embedder = MockEmbedder::new(8);
        let rows = embedder.embed(&[]).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(embedder.embedded_count(), 0);
    }

    #[tokio::test]
    async fn test_deterministic_and_normalized() {
        let embedder = MockEmbedder::new(16);
        let a1 = embedder.embed_single("let x = 1;").await.unwrap();
        let a2 = embedder.embed_single("let x = 1;").await.unwrap();
        let b = embedder.embed_single("fn main() {}").await.unwrap();

        assert_eq!(a1, a2);
        assert_ne!(a1, b);

        let norm: f32 = a1.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_empty_string_embeds_to_zero_vector() {
        let embedder = MockEmbedder::new(4);
        let v = embedder.embed_single("").await.unwrap();
        assert_eq!(v, vec![0.0; 4]);
    }

    #[test]
    fn test_l2_normalize_leaves_zero_alone() {
        let mut zero = vec![0.0_f32; 3];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 3]);

        let mut v = vec![3.0_f32, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
