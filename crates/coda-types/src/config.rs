//! Model configuration shared between the model manager and the server.

use serde::{Deserialize, Serialize};

/// Supported inference providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Ollama's native chat API. Supports hot-swap via its idle unload.
    Ollama,
    /// vLLM's OpenAI-compatible API. One model per server process.
    Vllm,
    /// llama.cpp's OpenAI-compatible server. One model per server process.
    Llamacpp,
}

impl Provider {
    /// Parse a provider name as stored in session rows.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ollama" => Some(Provider::Ollama),
            "vllm" => Some(Provider::Vllm),
            "llamacpp" | "llama.cpp" => Some(Provider::Llamacpp),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::Vllm => "vllm",
            Provider::Llamacpp => "llamacpp",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration identifying a single loadable model.
///
/// Two configs refer to the same resident model when provider, model name
/// and URL all match; context window and temperature are tuning knobs that
/// can be updated without a reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Inference provider.
    pub provider: Provider,
    /// Model identifier as the provider knows it.
    pub model_name: String,
    /// Provider base URL.
    pub url: String,
    /// Context window size in tokens.
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_context_window() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

impl ModelConfig {
    /// Create a config with default window and temperature.
    pub fn new(provider: Provider, model_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            provider,
            model_name: model_name.into(),
            url: url.into(),
            context_window: default_context_window(),
            temperature: default_temperature(),
        }
    }

    /// Whether `other` addresses the same resident model.
    pub fn same_model(&self, other: &ModelConfig) -> bool {
        self.provider == other.provider
            && self.model_name == other.model_name
            && self.url == other.url
    }

    /// Whether switching to `other` only changes tuning parameters.
    pub fn same_tuning(&self, other: &ModelConfig) -> bool {
        self.context_window == other.context_window && self.temperature == other.temperature
    }
}

impl std::fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model_name)
    }
}
