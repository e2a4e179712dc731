//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use coda_types::{ModelConfig, Provider};

/// Protocol version advertised in `server.hello`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Configuration assembled by the CLI (flags and `CODA_*` env vars).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Default model used when a session row carries no override.
    pub default_model: ModelConfig,
    /// Qdrant base URL; `None` selects the in-memory store.
    pub qdrant_url: Option<String>,
    /// Ollama embedding model name.
    pub embedding_model: String,
    /// Embedding dimensionality.
    pub embedding_dimensions: usize,
    /// Data directory holding the SQLite database.
    pub data_dir: PathBuf,
    /// Default module id for sessions that specify none.
    pub module_id: String,
    /// Whether the post-turn learning loop runs.
    pub ace_learning: bool,
    /// Protocol version string.
    pub protocol_version: String,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coda");
        Self {
            bind_addr: "127.0.0.1:8321".parse().unwrap(),
            default_model: ModelConfig::new(
                Provider::Ollama,
                "qwen3-coder",
                "http://localhost:11434",
            ),
            qdrant_url: Some("http://localhost:6333".to_string()),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimensions: 768,
            data_dir,
            module_id: "vscode".to_string(),
            ace_learning: true,
            protocol_version: PROTOCOL_VERSION.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("coda.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.protocol_version, "1.0");
        assert_eq!(config.default_model.provider, Provider::Ollama);
        assert!(config.db_path().ends_with("coda/coda.db"));
    }
}
