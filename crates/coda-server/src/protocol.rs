//! Wire protocol for the session channel. JSON with a dotted `type`
//! discriminator.

use serde::{Deserialize, Serialize};

use coda_agent::AgentEvent;

/// Messages from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Client introduction.
    #[serde(rename = "client.hello")]
    Hello {
        /// Client name and version.
        #[serde(default)]
        client_info: serde_json::Value,
    },
    /// Keepalive.
    #[serde(rename = "client.ping")]
    Ping,
    /// A user turn.
    #[serde(rename = "client.user_message")]
    UserMessage {
        /// The message text.
        message: String,
        /// Editor context (active file, diagnostics, open editors).
        #[serde(default)]
        context: Option<serde_json::Value>,
    },
    /// Decision for a pending approval request.
    #[serde(rename = "client.approval_response")]
    ApprovalResponse {
        /// The request being answered.
        request_id: String,
        /// The decision.
        approved: bool,
    },
    /// Cancel in-flight work and close.
    #[serde(rename = "client.cancel")]
    Cancel,
}

/// Messages from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Sent once on connect.
    #[serde(rename = "server.hello")]
    Hello {
        /// Protocol version.
        protocol_version: String,
        /// Server version, model, and capability summary.
        server_info: serde_json::Value,
    },
    /// Reply to `client.ping`.
    #[serde(rename = "server.pong")]
    Pong {
        /// RFC 3339 timestamp.
        timestamp: String,
    },
    /// The turn loop is reasoning.
    #[serde(rename = "assistant.thinking")]
    Thinking {
        /// Phase label.
        phase: String,
        /// Display message.
        message: String,
    },
    /// Incremental assistant text.
    #[serde(rename = "assistant.message_delta")]
    MessageDelta {
        /// The text delta.
        delta: String,
    },
    /// A tool is about to run.
    #[serde(rename = "assistant.tool_use")]
    ToolUse {
        /// Tool name.
        tool: String,
        /// Tool arguments.
        arguments: serde_json::Value,
    },
    /// Display-truncated tool result.
    #[serde(rename = "assistant.tool_result")]
    ToolResult {
        /// Tool name.
        tool: String,
        /// Display-sized result.
        result: serde_json::Value,
    },
    /// A tool awaits client approval.
    #[serde(rename = "assistant.approval_request")]
    ApprovalRequest {
        /// Id to echo in `client.approval_response`.
        request_id: String,
        /// Rendered prompt.
        prompt: String,
        /// Tool name.
        tool: String,
    },
    /// Terminal assistant message.
    #[serde(rename = "assistant.message_final")]
    MessageFinal {
        /// Full assistant text.
        message: String,
        /// Turn metadata.
        metadata: serde_json::Value,
    },
    /// Structured error.
    #[serde(rename = "server.error")]
    Error {
        /// Code and message.
        error: ErrorBody,
    },
}

/// Body of a `server.error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Structured code (`agent_error`, `session_not_found`, …).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ServerEvent {
    /// Build a `server.error` event.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

impl From<AgentEvent> for ServerEvent {
    fn from(event: AgentEvent) -> Self {
        match event {
            AgentEvent::Thinking { phase, message } => ServerEvent::Thinking { phase, message },
            AgentEvent::MessageDelta { delta } => ServerEvent::MessageDelta { delta },
            AgentEvent::ToolUse { tool, arguments } => ServerEvent::ToolUse { tool, arguments },
            AgentEvent::ToolResult { tool, result } => ServerEvent::ToolResult { tool, result },
            AgentEvent::ApprovalRequest {
                request_id,
                prompt,
                tool,
            } => ServerEvent::ApprovalRequest {
                request_id,
                prompt,
                tool,
            },
            AgentEvent::MessageFinal { message, metadata } => {
                ServerEvent::MessageFinal { message, metadata }
            }
            AgentEvent::Error { code, message } => ServerEvent::error(code, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_parsing() {
        let ping: ClientEvent = serde_json::from_str(r#"{"type": "client.ping"}"#).unwrap();
        assert!(matches!(ping, ClientEvent::Ping));

        let msg: ClientEvent = serde_json::from_str(
            r#"{"type": "client.user_message", "message": "list files"}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientEvent::UserMessage { message, context: None } if message == "list files"
        ));

        let approval: ClientEvent = serde_json::from_str(
            r#"{"type": "client.approval_response", "request_id": "r1", "approved": false}"#,
        )
        .unwrap();
        assert!(matches!(
            approval,
            ClientEvent::ApprovalResponse { request_id, approved: false } if request_id == "r1"
        ));

        let cancel: ClientEvent = serde_json::from_str(r#"{"type": "client.cancel"}"#).unwrap();
        assert!(matches!(cancel, ClientEvent::Cancel));
    }

    #[test]
    fn test_server_event_wire_names() {
        let hello = ServerEvent::Hello {
            protocol_version: "1.0".to_string(),
            server_info: serde_json::json!({}),
        };
        assert!(serde_json::to_string(&hello).unwrap().contains("server.hello"));

        let delta = ServerEvent::MessageDelta {
            delta: "hi".to_string(),
        };
        assert!(
            serde_json::to_string(&delta)
                .unwrap()
                .contains("assistant.message_delta")
        );

        let error = ServerEvent::error("agent_error", "boom");
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("server.error"));
        assert!(json.contains("agent_error"));
    }

    #[test]
    fn test_agent_event_mapping() {
        let mapped: ServerEvent = AgentEvent::ToolUse {
            tool: "read_file".to_string(),
            arguments: serde_json::json!({"file_path": "a.rs"}),
        }
        .into();
        let json = serde_json::to_string(&mapped).unwrap();
        assert!(json.contains("assistant.tool_use"));
        assert!(json.contains("read_file"));
    }
}
