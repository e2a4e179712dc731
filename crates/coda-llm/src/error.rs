//! Error types for the LLM crate.

use coda_types::Provider;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the LLM error type.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors produced by backends and the model manager.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failure reaching the backend.
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-OK status or an error body.
    #[error("backend error: {0}")]
    Backend(String),

    /// A streamed frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The request exceeded its total timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The provider cannot unload a resident model in place.
    #[error("{0} does not support hot-swap unload; restart the server to change models")]
    HotSwapUnsupported(Provider),

    /// A turn was requested with no active model.
    #[error("no model loaded")]
    NoModelLoaded,

    /// The switch lock timed out waiting for in-flight requests to drain.
    #[error("timed out waiting for {active} in-flight inference requests to finish")]
    SwitchTimeout {
        /// Requests still registered when the wait expired.
        active: usize,
    },
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout(Duration::from_secs(crate::DEFAULT_LLM_TIMEOUT_SECS))
        } else {
            LlmError::Network(e.to_string())
        }
    }
}

impl LlmError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Network(_) | LlmError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hot_swap_message_names_provider() {
        let err = LlmError::HotSwapUnsupported(Provider::Vllm);
        assert!(err.to_string().contains("vllm"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Network("reset".into()).is_transient());
        assert!(!LlmError::Config("bad url".into()).is_transient());
        assert!(!LlmError::NoModelLoaded.is_transient());
    }
}
