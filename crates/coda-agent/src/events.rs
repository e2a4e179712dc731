//! Events emitted by the turn loop toward the transport.

use serde::Serialize;

/// One event in a session turn. The transport maps these onto the wire
/// protocol's `assistant.*` / `server.error` messages, preserving order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The loop is starting an iteration.
    Thinking {
        /// Always `reasoning` for turn iterations.
        phase: String,
        /// Display message including the step index.
        message: String,
    },
    /// Incremental assistant text.
    MessageDelta {
        /// The text delta.
        delta: String,
    },
    /// A tool is about to run.
    ToolUse {
        /// Tool name.
        tool: String,
        /// Arguments as received from the model.
        arguments: serde_json::Value,
    },
    /// A tool finished; `result` is display-truncated.
    ToolResult {
        /// Tool name.
        tool: String,
        /// Display-sized result.
        result: serde_json::Value,
    },
    /// The policy requires a client decision before a tool runs.
    ApprovalRequest {
        /// Id the client must echo back.
        request_id: String,
        /// Rendered approval prompt.
        prompt: String,
        /// Tool awaiting approval.
        tool: String,
    },
    /// Terminal assistant message for the turn.
    MessageFinal {
        /// Full assistant text.
        message: String,
        /// `{ iterations, success, max_iterations_reached? }` plus error
        /// details when unsuccessful.
        metadata: serde_json::Value,
    },
    /// Turn-level error (no model loaded, protocol failure).
    Error {
        /// Structured code, e.g. `agent_error`.
        code: String,
        /// Human-readable message.
        message: String,
    },
}
