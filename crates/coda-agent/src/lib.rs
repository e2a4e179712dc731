//! The agent session runtime.
//!
//! Each session owns its conversation history, tool registry, and approval
//! state. A turn streams the model, dispatches tool calls (gated by the
//! workspace policy and client approvals), feeds results back, and iterates
//! until a terminal assistant message. Afterwards the session can run the
//! ACE learning loop against the turn's trajectory.

mod approvals;
mod events;
mod learning;
mod policy;
mod session;
mod tool;

pub mod tools;

pub use approvals::ApprovalBroker;
pub use events::AgentEvent;
pub use policy::{PolicyDecision, evaluate_tool_policy};
pub use session::{AgentSession, AgentSessionConfig, display_result};
pub use tool::{Tool, ToolRegistry};
