//! LLM backend trait, stream events, and a scripted mock for tests.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use coda_types::Provider;

use crate::error::{LlmError, Result};
use crate::types::{ChatRequest, ToolCall};

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Types
// ─────────────────────────────────────────────────────────────────────────────

/// A streaming response: events until exactly one `Done`, or an `Err` item
/// terminating the stream with no `Done`.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send + 'static>>;

/// Events emitted while streaming a completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text.
    Content {
        /// The text delta.
        text: String,
    },
    /// A structured tool invocation. Native calls arrive as the backend
    /// reports them; inline-XML calls arrive just before `Done`.
    ToolCall {
        /// The parsed call.
        call: ToolCall,
    },
    /// Terminal event carrying provider metadata (token counts, durations).
    Done {
        /// Provider-specific metadata.
        metadata: serde_json::Value,
    },
}

impl StreamEvent {
    /// Whether this event ends the response.
    pub fn is_done(&self) -> bool {
        matches!(self, StreamEvent::Done { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A streaming LLM provider.
///
/// Implementations connect to one local inference server and expose its
/// completions as a uniform event stream. Unloading is provider-specific:
/// Ollama relinquishes residency on its own, while vLLM and llama.cpp pin
/// one model per process and report [`LlmError::HotSwapUnsupported`].
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Execute a completion request and stream the response events.
    async fn stream(&self, request: ChatRequest) -> Result<EventStream>;

    /// Which provider this backend speaks to.
    fn provider(&self) -> Provider;

    /// The model this backend addresses.
    fn model_name(&self) -> &str;

    /// Whether the provider can release the resident model in place.
    fn supports_unload(&self) -> bool {
        false
    }

    /// Release the resident model.
    async fn unload(&self) -> Result<()> {
        Err(LlmError::HotSwapUnsupported(self.provider()))
    }
}

/// A backend shared across tasks.
pub type SharedBackend = Arc<dyn LlmBackend>;

impl std::fmt::Debug for dyn LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmBackend")
            .field("provider", &self.provider())
            .field("model_name", &self.model_name())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────────────────

/// A scripted backend for testing the agent loop and the ACE components.
///
/// Each call to [`stream`](LlmBackend::stream) consumes the next scripted
/// event list. Requests are logged for assertion.
pub struct MockBackend {
    model: String,
    scripts: parking_lot::Mutex<Vec<Vec<StreamEvent>>>,
    requests: parking_lot::Mutex<Vec<ChatRequest>>,
}

impl MockBackend {
    /// Create a mock that plays the given scripts in order.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            model: "mock-model".to_string(),
            scripts: parking_lot::Mutex::new(scripts),
            requests: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// A mock that streams one text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![Self::text_response(text)])
    }

    /// Script fragment: a plain text response.
    pub fn text_response(text: impl Into<String>) -> Vec<StreamEvent> {
        vec![
            StreamEvent::Content { text: text.into() },
            StreamEvent::Done {
                metadata: serde_json::json!({}),
            },
        ]
    }

    /// Script fragment: a single tool call with no content.
    pub fn tool_call_response(call: ToolCall) -> Vec<StreamEvent> {
        vec![
            StreamEvent::ToolCall { call },
            StreamEvent::Done {
                metadata: serde_json::json!({}),
            },
        ]
    }

    /// All requests made so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests made so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn stream(&self, request: ChatRequest) -> Result<EventStream> {
        self.requests.lock().push(request);

        let mut scripts = self.scripts.lock();
        if scripts.is_empty() {
            return Err(LlmError::Backend(
                "MockBackend: no more scripted responses".to_string(),
            ));
        }
        let events = scripts.remove(0);
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }

    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_unload(&self) -> bool {
        true
    }

    async fn unload(&self) -> Result<()> {
        Ok(())
    }
}
