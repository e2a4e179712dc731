//! LLM provider adapters and model lifecycle management.
//!
//! This crate exposes a unified streaming interface over the local inference
//! backends Coda talks to (Ollama, vLLM, llama.cpp), reconciles native and
//! inline-XML tool calls, and owns the single-active-model lifecycle through
//! [`ModelManager`].

mod backend;
mod error;
mod manager;
mod ollama;
mod openai_compat;
mod xml;

pub mod types;

pub use backend::{EventStream, LlmBackend, MockBackend, SharedBackend, StreamEvent};
pub use error::{LlmError, Result};
pub use manager::{BackendFactory, InferenceGuard, ModelManager, default_backend_factory};
pub use ollama::OllamaBackend;
pub use openai_compat::OpenAiCompatBackend;
pub use types::{ChatMessage, ChatRequest, ChatRole, ToolCall, ToolDefinition};
pub use xml::parse_xml_tool_calls;

/// Default total timeout for completion requests. Local models can take
/// minutes on long generations, so this is deliberately generous.
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 600;
