//! Ollama backend speaking the native `/api/chat` NDJSON protocol.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use coda_types::{ModelConfig, Provider};

use crate::DEFAULT_LLM_TIMEOUT_SECS;
use crate::backend::{EventStream, LlmBackend, StreamEvent};
use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatRequest, ChatRole, ToolCall};
use crate::xml::parse_xml_tool_calls;

/// Ollama backend.
///
/// Content is accumulated during streaming; when the final frame arrives and
/// the backend produced no native tool calls, the buffered content is parsed
/// for inline-XML tool calls which are emitted before `Done`.
pub struct OllamaBackend {
    client: Client,
    config: ModelConfig,
}

impl OllamaBackend {
    /// Create a backend for the given model config.
    pub fn new(config: ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.url.trim_end_matches('/'))
    }

    fn to_wire_request(&self, request: &ChatRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request.messages.iter().map(wire_message).collect();

        let mut options = serde_json::json!({ "temperature": request.temperature });
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = max_tokens.into();
        }
        if let Some(context_window) = request.context_window {
            options["num_ctx"] = context_window.into();
        }

        let mut body = serde_json::json!({
            "model": self.config.model_name,
            "messages": messages,
            "stream": true,
            "options": options,
        });
        if let Some(ref format) = request.response_format {
            body["format"] = serde_json::Value::String(format.clone());
        }
        if !request.tools.is_empty() {
            body["tools"] = request.tools.iter().map(|t| t.to_wire()).collect();
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
                    "function": { "name": call.name, "arguments": call.arguments }
                })
            })
            .collect();
    }
    wire
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn stream(&self, request: ChatRequest) -> Result<EventStream> {
        let body = self.to_wire_request(&request);

        tracing::debug!(
            model = %self.config.model_name,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending Ollama chat request"
        );

        let response = self.client.post(self.chat_url()).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Backend(format!("Ollama HTTP {}: {}", status, text)));
        }

        Ok(parse_ndjson_stream(response.bytes_stream()))
    }

    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn supports_unload(&self) -> bool {
        true
    }

    async fn unload(&self) -> Result<()> {
        // Ollama frees VRAM on its own idle timeout; a DELETE would remove
        // the model from disk, not from memory.
        tracing::info!(
            model = %self.config.model_name,
            "Ollama unload requested; relying on provider idle unload"
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// NDJSON Streaming
// ─────────────────────────────────────────────────────────────────────────────

struct NdjsonState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: String,
    pending: VecDeque<StreamEvent>,
    accumulated: String,
    native_tool_calls: usize,
    finished: bool,
}

fn parse_ndjson_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> EventStream {
    Box::pin(futures::stream::unfold(
        NdjsonState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
            pending: VecDeque::new(),
            accumulated: String::new(),
            native_tool_calls: 0,
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
                    process_line(&mut state, &line);
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
                            Err(LlmError::Decode(
                                "stream ended before final frame".to_string(),
                            )),
                            state,
                        ));
                    }
                }
            }
        },
    ))
}

fn process_line(state: &mut NdjsonState, line: &str) {
    let chunk: OllamaChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping undecodable Ollama frame");
            return;
        }
    };

    if let Some(message) = chunk.message {
        if let Some(content) = message.content {
            if !content.is_empty() {
                state.accumulated.push_str(&content);
                state.pending.push_back(StreamEvent::Content { text: content });
            }
        }
        if let Some(tool_calls) = message.tool_calls {
            for tc in tool_calls {
                let id = format!("call_{}", state.native_tool_calls);
                state.native_tool_calls += 1;
                state.pending.push_back(StreamEvent::ToolCall {
                    call: ToolCall::new(id, tc.function.name, tc.function.arguments),
                });
            }
        }
    }

    if chunk.done {
        if state.native_tool_calls == 0 && !state.accumulated.is_empty() {
            let (_, xml_calls) = parse_xml_tool_calls(&state.accumulated);
            if !xml_calls.is_empty() {
                tracing::info!(count = xml_calls.len(), "Parsed inline-XML tool calls");
            }
            for call in xml_calls {
                state.pending.push_back(StreamEvent::ToolCall { call });
            }
        }
        state.pending.push_back(StreamEvent::Done {
            metadata: serde_json::json!({
                "total_duration": chunk.total_duration,
                "load_duration": chunk.load_duration,
                "prompt_eval_count": chunk.prompt_eval_count,
                "eval_count": chunk.eval_count,
            }),
        });
        state.finished = true;
    }
}

#[derive(Debug, serde::Deserialize)]
struct OllamaChunk {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    total_duration: Option<u64>,
    load_duration: Option<u64>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, serde::Deserialize)]
struct OllamaMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, serde::Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, serde::Deserialize)]
struct OllamaFunction {
    name: String,
    arguments: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_backend() -> OllamaBackend {
        OllamaBackend::new(ModelConfig::new(
            Provider::Ollama,
            "qwen3-coder",
            "http://localhost:11434",
        ))
        .unwrap()
    }

    #[test]
    fn test_chat_url() {
        assert_eq!(test_backend().chat_url(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_wire_request_shape() {
        let backend = test_backend();
        let request = ChatRequest::new(vec![ChatMessage::user("hi")])
            .with_max_tokens(32)
            .with_context_window(8192)
            .with_json_format();
        let wire = backend.to_wire_request(&request);
        assert_eq!(wire["model"], "qwen3-coder");
        assert_eq!(wire["stream"], true);
        assert_eq!(wire["options"]["num_predict"], 32);
        assert_eq!(wire["options"]["num_ctx"], 8192);
        assert_eq!(wire["format"], "json");
        assert!(wire.get("tools").is_none());
    }

    #[test]
    fn test_wire_message_with_tool_calls() {
        let message = ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall::new("c0", "read_file", serde_json::json!({"file_path": "a.rs"}))],
        );
        let wire = wire_message(&message);
        assert_eq!(wire["role"], "assistant");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "read_file");
    }

    #[tokio::test]
    async fn test_ndjson_content_then_done() {
        let frames = vec![
            Ok(Bytes::from(
                "{\"message\":{\"content\":\"Hello\"},\"done\":false}\n",
            )),
            Ok(Bytes::from(
                "{\"message\":{\"content\":\" world\"},\"done\":false}\n{\"done\":true,\"eval_count\":5}\n",
            )),
        ];
        let mut stream = parse_ndjson_stream(futures::stream::iter(frames));

        let mut text = String::new();
        let mut done = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::Content { text: t } => text.push_str(&t),
                StreamEvent::Done { metadata } => {
                    done = true;
                    assert_eq!(metadata["eval_count"], 5);
                }
                StreamEvent::ToolCall { .. } => panic!("unexpected tool call"),
            }
        }
        assert_eq!(text, "Hello world");
        assert!(done);
    }

    #[tokio::test]
    async fn test_ndjson_xml_tool_call_extraction_at_done() {
        let content = "sure<function=read_file><parameter=file_path>README.md</parameter></function>done";
        let frame = format!(
            "{{\"message\":{{\"content\":{}}},\"done\":false}}\n{{\"done\":true}}\n",
            serde_json::to_string(content).unwrap()
        );
        let mut stream = parse_ndjson_stream(futures::stream::iter(vec![Ok(Bytes::from(frame))]));

        let mut tool_calls = Vec::new();
        while let Some(event) = stream.next().await {
            if let StreamEvent::ToolCall { call } = event.unwrap() {
                tool_calls.push(call);
            }
        }
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "read_file");
        assert_eq!(tool_calls[0].arguments["file_path"], "README.md");
    }

    #[tokio::test]
    async fn test_ndjson_native_calls_suppress_xml_parse() {
        let frame = concat!(
            "{\"message\":{\"content\":\"<function=x><parameter=a>1</parameter></function>\",",
            "\"tool_calls\":[{\"function\":{\"name\":\"list_files\",\"arguments\":{\"directory\":\".\"}}}]},",
            "\"done\":false}\n",
            "{\"done\":true}\n"
        );
        let mut stream =
            parse_ndjson_stream(futures::stream::iter(vec![Ok(Bytes::from(frame))]));

        let mut tool_calls = Vec::new();
        while let Some(event) = stream.next().await {
            if let StreamEvent::ToolCall { call } = event.unwrap() {
                tool_calls.push(call);
            }
        }
        // Only the native call; the XML-looking content is not re-parsed.
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "list_files");
    }

    #[tokio::test]
    async fn test_ndjson_truncated_stream_errors() {
        let frames = vec![Ok(Bytes::from(
            "{\"message\":{\"content\":\"partial\"},\"done\":false}\n",
        ))];
        let mut stream = parse_ndjson_stream(futures::stream::iter(frames));

        let first = stream.next().await.unwrap();
        assert!(matches!(first.unwrap(), StreamEvent::Content { .. }));
        let second = stream.next().await.unwrap();
        assert!(second.is_err());
        assert!(stream.next().await.is_none());
    }
}
