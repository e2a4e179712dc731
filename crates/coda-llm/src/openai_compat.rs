//! OpenAI-compatible backend for vLLM and llama.cpp servers.
//!
//! Both speak `/v1/chat/completions` with SSE streaming. Tool-call argument
//! fragments are assembled here so consumers always see whole calls.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::time::Duration;

use coda_types::{ModelConfig, Provider};

use crate::DEFAULT_LLM_TIMEOUT_SECS;
use crate::backend::{EventStream, LlmBackend, StreamEvent};
use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatRequest, ChatRole, ToolCall};

/// Backend for OpenAI-compatible servers (vLLM, llama.cpp).
pub struct OpenAiCompatBackend {
    client: Client,
    config: ModelConfig,
}

impl OpenAiCompatBackend {
    /// Create a backend for the given model config. The provider must be
    /// [`Provider::Vllm`] or [`Provider::Llamacpp`].
    pub fn new(config: ModelConfig) -> Result<Self> {
        if config.provider == Provider::Ollama {
            return Err(LlmError::Config(
                "OpenAiCompatBackend does not serve the ollama provider".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.url.trim_end_matches('/')
        )
    }

    fn to_wire_request(&self, request: &ChatRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request.messages.iter().map(wire_message).collect();

        let mut body = serde_json::json!({
            "messages": messages,
            "stream": true,
            "temperature": request.temperature,
        });
        // llama.cpp serves whatever model it was started with; vLLM routes by name.
        if self.config.provider == Provider::Vllm {
            body["model"] = serde_json::Value::String(self.config.model_name.clone());
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        if !request.tools.is_empty() {
            body["tools"] = request.tools.iter().map(|t| t.to_wire()).collect();
            if self.config.provider == Provider::Vllm {
                body["tool_choice"] = "auto".into();
            }
        }
        if request.response_format.as_deref() == Some("json") {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

fn wire_message(message: &ChatMessage) -> serde_json::Value {
    let role = match message.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    };
    let mut wire = serde_json::json!({ "role": role, "content": message.content });
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                serde_json::json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect();
    }
    if let Some(ref id) = message.tool_call_id {
        wire["tool_call_id"] = serde_json::Value::String(id.clone());
    }
    wire
}

#[async_trait]
impl LlmBackend for OpenAiCompatBackend {
    async fn stream(&self, request: ChatRequest) -> Result<EventStream> {
        let body = self.to_wire_request(&request);

        tracing::debug!(
            provider = %self.config.provider,
            model = %self.config.model_name,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending OpenAI-compatible chat request"
        );

        let response = self
            .client
            .post(self.completions_url())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Backend(format!(
                "{} HTTP {}: {}",
                self.config.provider, status, text
            )));
        }

        Ok(parse_sse_stream(response.bytes_stream()))
    }

    fn provider(&self) -> Provider {
        self.config.provider
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE Streaming
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: String,
    pending: VecDeque<StreamEvent>,
    partial_calls: BTreeMap<usize, PartialToolCall>,
    finished: bool,
}

fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> EventStream {
    Box::pin(futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
            pending: VecDeque::new(),
            partial_calls: BTreeMap::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((Ok(event), state));
                }
                if state.finished {
                    return None;
                }

                while let Some(line_end) = state.buffer.find('\n') {
                    let line = state.buffer[..line_end].trim().to_string();
                    state.buffer.drain(..=line_end);
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(data) = line.strip_prefix("data: ") {
                        if data == "[DONE]" {
                            // Providers normally send finish_reason first; this
                            // covers servers that only send the sentinel.
                            if !state.finished {
                                flush_done(&mut state, serde_json::json!({}));
                            }
                        } else {
                            process_data(&mut state, data);
                        }
                    }
                    if !state.pending.is_empty() || state.finished {
                        break;
                    }
                }
                if !state.pending.is_empty() {
                    continue;
                }
                if state.finished {
                    return None;
                }

                match state.byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(e.into()), state));
                    }
                    None => {
                        state.finished = true;
                        return Some((
                            Err(LlmError::Decode("stream ended before [DONE]".to_string())),
                            state,
                        ));
                    }
                }
            }
        },
    ))
}

fn process_data(state: &mut SseState, data: &str) {
    let chunk: SseChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping undecodable SSE frame");
            return;
        }
    };

    let Some(choice) = chunk.choices.into_iter().next() else {
        return;
    };

    if let Some(delta) = choice.delta {
        if let Some(content) = delta.content {
            if !content.is_empty() {
                state.pending.push_back(StreamEvent::Content { text: content });
            }
        }
        if let Some(tool_calls) = delta.tool_calls {
            for tc in tool_calls {
                let entry = state.partial_calls.entry(tc.index.unwrap_or(0)).or_default();
                if let Some(id) = tc.id {
                    entry.id = Some(id);
                }
                if let Some(function) = tc.function {
                    if let Some(name) = function.name {
                        entry.name = Some(name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }
    }

    if let Some(finish_reason) = choice.finish_reason {
        flush_done(state, serde_json::json!({ "finish_reason": finish_reason }));
    }
}

fn flush_done(state: &mut SseState, metadata: serde_json::Value) {
    let partials = std::mem::take(&mut state.partial_calls);
    for (index, partial) in partials {
        let Some(name) = partial.name else { continue };
        let arguments: serde_json::Value = if partial.arguments.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&partial.arguments).unwrap_or(serde_json::json!({}))
        };
        let id = partial.id.unwrap_or_else(|| format!("call_{}", index));
        state
            .pending
            .push_back(StreamEvent::ToolCall {
                call: ToolCall::new(id, name, arguments),
            });
    }
    state.pending.push_back(StreamEvent::Done { metadata });
    state.finished = true;
}

#[derive(Debug, serde::Deserialize)]
struct SseChunk {
    choices: Vec<SseChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct SseChoice {
    delta: Option<SseDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct SseDelta {
    content: Option<String>,
    tool_calls: Option<Vec<SseToolCall>>,
}

#[derive(Debug, serde::Deserialize)]
struct SseToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<SseFunction>,
}

#[derive(Debug, serde::Deserialize)]
struct SseFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vllm_backend() -> OpenAiCompatBackend {
        OpenAiCompatBackend::new(ModelConfig::new(
            Provider::Vllm,
            "deepseek-coder",
            "http://localhost:8000",
        ))
        .unwrap()
    }

    #[test]
    fn test_rejects_ollama_provider() {
        let result = OpenAiCompatBackend::new(ModelConfig::new(
            Provider::Ollama,
            "m",
            "http://localhost:11434",
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            vllm_backend().completions_url(),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn test_vllm_includes_model_llamacpp_does_not() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let wire = vllm_backend().to_wire_request(&request);
        assert_eq!(wire["model"], "deepseek-coder");

        let llamacpp = OpenAiCompatBackend::new(ModelConfig::new(
            Provider::Llamacpp,
            "local",
            "http://localhost:8080",
        ))
        .unwrap();
        let wire = llamacpp.to_wire_request(&request);
        assert!(wire.get("model").is_none());
    }

    #[test]
    fn test_unload_unsupported() {
        let backend = vllm_backend();
        assert!(!backend.supports_unload());
        let err = futures::executor::block_on(backend.unload()).unwrap_err();
        assert!(matches!(err, LlmError::HotSwapUnsupported(Provider::Vllm)));
    }

    #[tokio::test]
    async fn test_sse_content_and_finish() {
        let frames = vec![
            Ok(Bytes::from(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n",
            )),
            Ok(Bytes::from(
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
            )),
        ];
        let mut stream = parse_sse_stream(futures::stream::iter(frames));

        let mut text = String::new();
        let mut metadata = None;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::Content { text: t } => text.push_str(&t),
                StreamEvent::Done { metadata: m } => metadata = Some(m),
                StreamEvent::ToolCall { .. } => panic!("unexpected tool call"),
            }
        }
        assert_eq!(text, "Hi");
        assert_eq!(metadata.unwrap()["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn test_sse_assembles_fragmented_tool_call() {
        let frames = vec![
            Ok(Bytes::from(concat!(
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_9\",",
                "\"function\":{\"name\":\"read_file\",\"arguments\":\"{\\\"file_\"}}]},\"finish_reason\":null}]}\n\n",
            ))),
            Ok(Bytes::from(concat!(
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,",
                "\"function\":{\"arguments\":\"path\\\":\\\"a.rs\\\"}\"}}]},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
                "data: [DONE]\n\n",
            ))),
        ];
        let mut stream = parse_sse_stream(futures::stream::iter(frames));

        let mut calls = Vec::new();
        while let Some(event) = stream.next().await {
            if let StreamEvent::ToolCall { call } = event.unwrap() {
                calls.push(call);
            }
        }
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_9");
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments["file_path"], "a.rs");
    }
}
