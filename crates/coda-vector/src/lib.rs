//! Vector store and embedding adapters.
//!
//! Collections, points and k-NN search are exposed through the
//! [`VectorStore`] trait with two implementations: [`QdrantStore`] over the
//! Qdrant REST API and [`MemoryVectorStore`] for tests and embedded runs.
//! Text-to-vector conversion goes through [`Embedder`], with an Ollama
//! adapter and a deterministic mock.

mod embed;
mod error;
mod memory;
mod qdrant;
mod store;

pub use embed::{Embedder, MockEmbedder, OllamaEmbedder, SharedEmbedder, l2_normalize};
pub use error::{Result, VectorError};
pub use memory::MemoryVectorStore;
pub use qdrant::QdrantStore;
pub use store::{
    CollectionInfo, Distance, Filter, Point, ScrollPage, SearchHit, SharedVectorStore, VectorStore,
};
