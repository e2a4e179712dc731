//! The tool interface and registry.
//!
//! Tools return JSON objects with a `success` field; failures are values,
//! not errors, so the model can react to them and the loop continues.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use coda_llm::ToolDefinition;

/// An agent capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> serde_json::Value;

    /// Whether execution must pass the approval gate.
    fn requires_approval(&self) -> bool {
        false
    }

    /// Policy scope: `"command"` tools are additionally checked against the
    /// workspace's allowed/blocked command lists.
    fn approval_scope(&self) -> &str {
        "tool"
    }

    /// The prompt shown to the user when approval is requested.
    fn approval_prompt(&self, arguments: &serde_json::Value) -> String {
        let _ = arguments;
        format!("Approve {} execution?", self.name())
    }

    /// Execute with the given arguments. Must return an object with a
    /// boolean `success` field.
    async fn execute(&self, arguments: serde_json::Value) -> serde_json::Value;
}

/// A successful result helper.
pub(crate) fn failure(error: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "success": false, "error": error.into() })
}

/// Registry mapping tool names to implementations.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Re-registering a name replaces the prior tool.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        if !self.order.contains(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, Arc::new(tool));
    }

    /// A tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Wire definitions for the LLM request, in registration order.
    pub fn to_definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition::new(tool.name(), tool.description(), tool.parameters()))
            .collect()
    }

    /// Execute a tool. Unknown names come back as a failure value.
    pub async fn execute(&self, name: &str, arguments: serde_json::Value) -> serde_json::Value {
        match self.get(name) {
            Some(tool) => tool.execute(arguments).await,
            None => {
                tracing::warn!(tool = name, "Unknown tool requested");
                failure(format!("Unknown tool: {}", name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> serde_json::Value {
            serde_json::json!({ "success": true, "echo": arguments["text"] })
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        assert_eq!(registry.names(), vec!["echo"]);
        let result = registry
            .execute("echo", serde_json::json!({"text": "hi"}))
            .await;
        assert_eq!(result["success"], true);
        assert_eq!(result["echo"], "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failure_value() {
        let registry = ToolRegistry::new();
        let result = registry.execute("missing", serde_json::json!({})).await;
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("missing"));
    }

    #[test]
    fn test_definitions_in_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let defs = registry.to_definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert!(defs[0].parameters["properties"]["text"].is_object());
    }
}
