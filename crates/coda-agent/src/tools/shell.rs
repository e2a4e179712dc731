//! Shell command tools. Both require approval under the workspace policy.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::tool::{Tool, failure};

/// Default command timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

async fn run_shell(root: &PathBuf, command: &str, timeout_secs: u64) -> serde_json::Value {
    tracing::info!(command, workspace = %root.display(), "Running command");

    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(root)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::error!(command, error = %e, "Command spawn failed");
            return failure(format!("Failed to execute command: {}", e));
        }
        Err(_) => {
            return failure(format!("Command timed out after {} seconds", timeout_secs));
        }
    };

    let return_code = output.status.code().unwrap_or(-1);
    serde_json::json!({
        "success": output.status.success(),
        "return_code": return_code,
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
        "command": command,
    })
}

/// Execute a shell command in the workspace directory.
pub struct RunCommandTool {
    root: PathBuf,
}

impl RunCommandTool {
    /// Create the tool rooted at the workspace.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace directory"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (default: 30)",
                    "default": 30
                }
            },
            "required": ["command"]
        })
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn approval_scope(&self) -> &str {
        "command"
    }

    fn approval_prompt(&self, arguments: &serde_json::Value) -> String {
        format!(
            "Approve command execution: {}",
            arguments["command"].as_str().unwrap_or_default()
        )
    }

    async fn execute(&self, arguments: serde_json::Value) -> serde_json::Value {
        let Some(command) = arguments["command"].as_str() else {
            return failure("missing required parameter: command");
        };
        let timeout = arguments["timeout"].as_u64().unwrap_or(DEFAULT_TIMEOUT_SECS);
        run_shell(&self.root, command, timeout).await
    }
}

/// Run a test command in the workspace directory.
pub struct RunTestsTool {
    root: PathBuf,
}

impl RunTestsTool {
    /// Create the tool rooted at the workspace.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for RunTestsTool {
    fn name(&self) -> &str {
        "run_tests"
    }

    fn description(&self) -> &str {
        "Run a test command in the workspace directory"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The test command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (default: 30)",
                    "default": 30
                }
            },
            "required": ["command"]
        })
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn approval_scope(&self) -> &str {
        "command"
    }

    fn approval_prompt(&self, arguments: &serde_json::Value) -> String {
        format!(
            "Approve test run: {}",
            arguments["command"].as_str().unwrap_or_default()
        )
    }

    async fn execute(&self, arguments: serde_json::Value) -> serde_json::Value {
        let Some(command) = arguments["command"].as_str() else {
            return failure("missing required parameter: command");
        };
        let timeout = arguments["timeout"].as_u64().unwrap_or(DEFAULT_TIMEOUT_SECS);
        run_shell(&self.root, command, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_success_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let tool = RunCommandTool::new(dir.path());

        let result = tool
            .execute(serde_json::json!({"command": "echo hello"}))
            .await;
        assert_eq!(result["success"], true);
        assert_eq!(result["return_code"], 0);
        assert!(result["stdout"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn test_command_failure_return_code() {
        let dir = tempfile::tempdir().unwrap();
        let tool = RunCommandTool::new(dir.path());

        let result = tool.execute(serde_json::json!({"command": "exit 3"})).await;
        assert_eq!(result["success"], false);
        assert_eq!(result["return_code"], 3);
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = RunCommandTool::new(dir.path());

        let result = tool
            .execute(serde_json::json!({"command": "sleep 5", "timeout": 1}))
            .await;
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("timed out"));
    }

    #[test]
    fn test_requires_approval_with_command_scope() {
        let dir = tempfile::tempdir().unwrap();
        let tool = RunCommandTool::new(dir.path());
        assert!(tool.requires_approval());
        assert_eq!(tool.approval_scope(), "command");
        let prompt = tool.approval_prompt(&serde_json::json!({"command": "ls"}));
        assert!(prompt.contains("ls"));
    }
}
